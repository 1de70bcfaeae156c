//! Tunnel Manager - GRE tunnel lifecycle over a kernel port

use std::net::IpAddr;

use tracing::{debug, info, warn};

use crate::error::{translate, TunnelError, TunnelOp, TunnelResult};
use crate::kernel::{GreLinkSpec, KernelInterface, Link};
use crate::types::{TunnelConfig, TunnelStatus};
use crate::validate::{validate_cidr, validate_config, validate_name};

/// Tunnel Manager
///
/// Creates, inspects and removes GRE tunnels through the kernel port it is
/// built with. Holds no state of its own: every query is answered from the
/// kernel's interface table.
pub struct TunnelMgr<K: KernelInterface> {
    kernel: K,
}

impl<K: KernelInterface> TunnelMgr<K> {
    /// Create a new TunnelMgr over `kernel`
    pub fn new(kernel: K) -> Self {
        Self { kernel }
    }

    /// The kernel port this manager drives
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Create a GRE tunnel and bring it up.
    ///
    /// If bring-up fails the new interface is deleted again before the
    /// bring-up error is returned.
    pub async fn create(&self, config: &TunnelConfig) -> TunnelResult<()> {
        validate_config(config)?;
        let name = config.name.as_str();

        let existing = self
            .kernel
            .find_link_by_name(name)
            .await
            .map_err(|e| translate(e, TunnelOp::Create, name))?;
        if existing.is_some() {
            return Err(TunnelError::Exists {
                name: name.to_string(),
            });
        }

        let spec = GreLinkSpec {
            name: name.to_string(),
            local: ipv4(config.local_address, "local IP")?,
            remote: ipv4(config.remote_address, "remote IP")?,
            ikey: config.key,
            okey: config.key,
            ttl: config.effective_ttl(),
        };

        self.kernel
            .add_link(&spec)
            .await
            .map_err(|e| translate(e, TunnelOp::Create, name))?;

        if let Err(e) = self.kernel.bring_link_up(name).await {
            if let Err(rollback) = self.kernel.delete_link(name).await {
                warn!(
                    tunnel = name,
                    error = %rollback,
                    "Failed to remove tunnel after bring-up failure"
                );
            }
            return Err(translate(e, TunnelOp::Create, name));
        }

        info!(
            tunnel = name,
            local = %spec.local,
            remote = %spec.remote,
            key = spec.ikey,
            ttl = spec.ttl,
            "Created GRE tunnel"
        );
        Ok(())
    }

    /// Create a tunnel, then assign `cidr` to it when given.
    ///
    /// An assignment failure leaves the tunnel in place.
    pub async fn create_with_address(
        &self,
        config: &TunnelConfig,
        cidr: Option<&str>,
    ) -> TunnelResult<()> {
        self.create(config).await?;
        if let Some(cidr) = cidr {
            self.assign_ip(&config.name, cidr).await?;
        }
        Ok(())
    }

    /// Delete a GRE tunnel
    pub async fn delete(&self, name: &str) -> TunnelResult<()> {
        if name.is_empty() {
            return Err(TunnelError::validation(
                "name",
                name,
                "tunnel name cannot be empty",
            ));
        }

        let link = self.resolve(name, TunnelOp::Delete).await?;
        if !link.is_gre() {
            return Err(TunnelError::InvalidType {
                name: name.to_string(),
                actual_type: link.kind,
            });
        }

        self.kernel
            .delete_link(name)
            .await
            .map_err(|e| translate(e, TunnelOp::Delete, name))?;

        info!(tunnel = name, "Deleted GRE tunnel");
        Ok(())
    }

    /// Assign an IPv4 address in CIDR notation to a tunnel
    pub async fn assign_ip(&self, name: &str, cidr: &str) -> TunnelResult<()> {
        validate_name(name)?;
        let net = validate_cidr(cidr)?;

        self.resolve(name, TunnelOp::AssignIp).await?;

        self.kernel
            .add_address(name, net)
            .await
            .map_err(|e| translate(e, TunnelOp::AssignIp, name))?;

        info!(tunnel = name, address = %net, "Assigned tunnel address");
        Ok(())
    }

    /// Read the current status of a GRE tunnel
    pub async fn get(&self, name: &str) -> TunnelResult<TunnelStatus> {
        let link = self.resolve(name, TunnelOp::Get).await?;

        match &link.gre {
            Some(gre) if link.is_gre() => {
                let address = self.first_address(name).await;
                Ok(TunnelStatus::from_gre(name, gre, link.is_up, address))
            }
            _ => Err(TunnelError::InvalidType {
                name: name.to_string(),
                actual_type: link.kind,
            }),
        }
    }

    /// List every GRE tunnel on the host
    pub async fn list(&self) -> TunnelResult<Vec<TunnelStatus>> {
        let links = self
            .kernel
            .list_links()
            .await
            .map_err(|e| translate(e, TunnelOp::List, ""))?;

        let mut tunnels = Vec::new();
        for link in links {
            let Some(gre) = link.gre.filter(|_| link.is_gre()) else {
                continue;
            };
            let address = self.first_address(&link.name).await;
            tunnels.push(TunnelStatus::from_gre(
                link.name.as_str(),
                &gre,
                link.is_up,
                address,
            ));
        }

        debug!(count = tunnels.len(), "Listed GRE tunnels");
        Ok(tunnels)
    }

    /// Look up a link, mapping absence to `NotFound`
    async fn resolve(&self, name: &str, op: TunnelOp) -> TunnelResult<Link> {
        self.kernel
            .find_link_by_name(name)
            .await
            .map_err(|e| translate(e, op, name))?
            .ok_or_else(|| TunnelError::NotFound {
                name: name.to_string(),
            })
    }

    /// First address on the interface; listing failures yield `None`
    async fn first_address(&self, name: &str) -> Option<String> {
        match self.kernel.list_addresses(name).await {
            Ok(addrs) => addrs.first().map(ToString::to_string),
            Err(e) => {
                debug!(tunnel = name, error = %e, "Could not list tunnel addresses");
                None
            }
        }
    }
}

/// Endpoints have passed validation, so this only guards the narrowing
fn ipv4(addr: IpAddr, field: &str) -> TunnelResult<std::net::Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(TunnelError::validation(
            field,
            addr.to_string(),
            format!("{} must be an IPv4 address", field),
        )),
    }
}
