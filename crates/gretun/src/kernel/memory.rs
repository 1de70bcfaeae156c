//! In-memory kernel port for tests.
//!
//! Keeps an interface table keyed by name and mimics the kernel's answers
//! (EEXIST on duplicate names, ENODEV on unknown ones). Any capability can
//! be made to fail with an injected errno, and every call is counted.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::{IpNet, Ipv4Net};
use nix::errno::Errno;
use parking_lot::Mutex;

use super::{GreAttrs, GreLinkSpec, KernelError, KernelInterface, KernelResult, Link};
use crate::types::GRE_KIND;

/// Capabilities of the port, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelCall {
    AddLink,
    DeleteLink,
    FindLink,
    BringUp,
    ListLinks,
    AddAddress,
    ListAddresses,
}

#[derive(Debug, Default)]
struct Table {
    links: BTreeMap<String, Link>,
    addresses: HashMap<String, Vec<IpNet>>,
    failures: HashMap<KernelCall, Errno>,
    calls: HashMap<KernelCall, usize>,
}

impl Table {
    /// Count the call and return the injected failure, if any
    fn enter(&mut self, call: KernelCall) -> KernelResult<()> {
        *self.calls.entry(call).or_default() += 1;
        match self.failures.get(&call) {
            Some(errno) => Err(KernelError::os(*errno, format!("injected {:?} failure", call))),
            None => Ok(()),
        }
    }

    fn link_mut(&mut self, name: &str) -> KernelResult<&mut Link> {
        self.links
            .get_mut(name)
            .ok_or_else(|| no_such_device(name))
    }
}

fn no_such_device(name: &str) -> KernelError {
    KernelError::os(Errno::ENODEV, format!("Cannot find device \"{}\"", name))
}

/// In-memory interface table.
#[derive(Debug, Default)]
pub struct MemoryKernel {
    table: Mutex<Table>,
}

impl MemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a GRE link (builder pattern)
    pub fn with_gre_link(
        self,
        name: &str,
        local: Ipv4Addr,
        remote: Ipv4Addr,
        key: u32,
        ttl: u8,
        is_up: bool,
    ) -> Self {
        let link = Link {
            name: name.to_string(),
            kind: GRE_KIND.to_string(),
            is_up,
            gre: Some(GreAttrs {
                local: Some(local),
                remote: Some(remote),
                ikey: key,
                okey: key,
                ttl,
            }),
        };
        self.table.lock().links.insert(name.to_string(), link);
        self
    }

    /// Seed a link of any kind without GRE attributes (builder pattern)
    pub fn with_link(self, name: &str, kind: &str, is_up: bool) -> Self {
        let link = Link {
            name: name.to_string(),
            kind: kind.to_string(),
            is_up,
            gre: None,
        };
        self.table.lock().links.insert(name.to_string(), link);
        self
    }

    /// Seed an address on a link (builder pattern)
    pub fn with_address(self, name: &str, addr: IpNet) -> Self {
        self.table
            .lock()
            .addresses
            .entry(name.to_string())
            .or_default()
            .push(addr);
        self
    }

    /// Make every subsequent `call` fail with `errno`
    pub fn fail_with(&self, call: KernelCall, errno: Errno) {
        self.table.lock().failures.insert(call, errno);
    }

    /// Remove an injected failure
    pub fn clear_failure(&self, call: KernelCall) {
        self.table.lock().failures.remove(&call);
    }

    /// Number of times `call` was invoked
    pub fn call_count(&self, call: KernelCall) -> usize {
        self.table.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Current state of a link, bypassing call counting
    pub fn link(&self, name: &str) -> Option<Link> {
        self.table.lock().links.get(name).cloned()
    }

    /// Addresses held by a link, bypassing call counting
    pub fn addresses(&self, name: &str) -> Vec<IpNet> {
        self.table
            .lock()
            .addresses
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl KernelInterface for MemoryKernel {
    async fn add_link(&self, spec: &GreLinkSpec) -> KernelResult<()> {
        let mut table = self.table.lock();
        table.enter(KernelCall::AddLink)?;
        if table.links.contains_key(&spec.name) {
            return Err(KernelError::os(Errno::EEXIST, "RTNETLINK answers: File exists"));
        }
        table.links.insert(
            spec.name.clone(),
            Link {
                name: spec.name.clone(),
                kind: GRE_KIND.to_string(),
                is_up: false,
                gre: Some(spec.attrs()),
            },
        );
        Ok(())
    }

    async fn delete_link(&self, name: &str) -> KernelResult<()> {
        let mut table = self.table.lock();
        table.enter(KernelCall::DeleteLink)?;
        table.links.remove(name).ok_or_else(|| no_such_device(name))?;
        table.addresses.remove(name);
        Ok(())
    }

    async fn find_link_by_name(&self, name: &str) -> KernelResult<Option<Link>> {
        let mut table = self.table.lock();
        table.enter(KernelCall::FindLink)?;
        Ok(table.links.get(name).cloned())
    }

    async fn bring_link_up(&self, name: &str) -> KernelResult<()> {
        let mut table = self.table.lock();
        table.enter(KernelCall::BringUp)?;
        table.link_mut(name)?.is_up = true;
        Ok(())
    }

    async fn list_links(&self) -> KernelResult<Vec<Link>> {
        let mut table = self.table.lock();
        table.enter(KernelCall::ListLinks)?;
        Ok(table.links.values().cloned().collect())
    }

    async fn add_address(&self, name: &str, addr: Ipv4Net) -> KernelResult<()> {
        let mut table = self.table.lock();
        table.enter(KernelCall::AddAddress)?;
        table.link_mut(name)?;
        let addrs = table.addresses.entry(name.to_string()).or_default();
        let addr = IpNet::V4(addr);
        if addrs.contains(&addr) {
            return Err(KernelError::os(Errno::EEXIST, "RTNETLINK answers: File exists"));
        }
        addrs.push(addr);
        Ok(())
    }

    async fn list_addresses(&self, name: &str) -> KernelResult<Vec<IpNet>> {
        let mut table = self.table.lock();
        table.enter(KernelCall::ListAddresses)?;
        table.link_mut(name)?;
        Ok(table.addresses.get(name).cloned().unwrap_or_default())
    }
}
