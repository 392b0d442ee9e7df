pub mod authority;

pub use authority::{
    load_authority, AuthorityError, CustomAuthority, PolicyFileAuthority, UnavailableAuthority,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::{ApplicationIdentity, Outcome, RequestedPermissions};

/// Environment descriptors every sandboxed application may read.
pub const SANDBOX_READABLE_PROPERTIES: &[&str] = &[
    "java.version",
    "java.vendor",
    "java.vendor.url",
    "java.class.version",
    "java.specification.version",
    "os.name",
    "os.version",
    "os.arch",
    "file.separator",
    "path.separator",
    "line.separator",
    "javawebstart.version",
];

/// Lowest port an elevated application may listen on.
pub const UNPRIVILEGED_PORT: u16 = 1024;

/// A single enumerable permission held by running code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capability {
    ReadProperty { name: String },
    WriteProperty { name: String },
    /// Outbound connection to `host` or `host:port`; `*` for any host
    NetworkConnect { host: String },
    NetworkListen { host: String, min_port: u16 },
    ReadFile { path: String },
    WriteFile { path: String },
    ProcessExit,
    StopThread,
    Clipboard,
    QueuePrintJob,
    LoadLibrary,
    ShowWindowWithoutBanner,
}

impl Capability {
    pub fn read_property(name: impl Into<String>) -> Self {
        Capability::ReadProperty { name: name.into() }
    }

    pub fn connect(host: impl Into<String>) -> Self {
        Capability::NetworkConnect { host: host.into() }
    }

    /// True when holding `self` also grants `other`. Targets ending in `*`
    /// cover everything with that prefix.
    pub fn implies(&self, other: &Capability) -> bool {
        use Capability::*;

        match (self, other) {
            (ReadProperty { name: granted }, ReadProperty { name })
            | (WriteProperty { name: granted }, WriteProperty { name }) => {
                target_matches(granted, name)
            }
            (NetworkConnect { host: granted }, NetworkConnect { host }) => {
                target_matches(granted, host)
            }
            (ReadFile { path: granted }, ReadFile { path })
            | (WriteFile { path: granted }, WriteFile { path }) => target_matches(granted, path),
            (
                NetworkListen { host: granted, min_port: granted_min },
                NetworkListen { host, min_port },
            ) => target_matches(granted, host) && min_port >= granted_min,
            (a, b) => a == b,
        }
    }
}

fn target_matches(granted: &str, requested: &str) -> bool {
    match granted.strip_suffix('*') {
        Some(prefix) => requested.starts_with(prefix),
        None => granted.eq_ignore_ascii_case(requested),
    }
}

/// Immutable set of capabilities granted to one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityGrantSet {
    capabilities: BTreeSet<Capability>,
    unrestricted: bool,
}

impl CapabilityGrantSet {
    /// The zero-grant set.
    pub fn none() -> Self {
        Self::default()
    }

    /// Closed allow-list: environment reads and outbound connections to the
    /// origin host and the declared resource hosts. No files, no process control.
    pub fn sandbox(identity: &ApplicationIdentity) -> Self {
        let mut capabilities: BTreeSet<Capability> = SANDBOX_READABLE_PROPERTIES
            .iter()
            .map(|name| Capability::read_property(*name))
            .collect();

        if let Some(origin) = identity.host_and_port() {
            capabilities.insert(Capability::connect(origin));
        }
        for host in &identity.resource_hosts {
            let host = host.trim().to_lowercase();
            if !host.is_empty() && host != "*" {
                capabilities.insert(Capability::connect(host));
            }
        }

        CapabilityGrantSet {
            capabilities,
            unrestricted: false,
        }
    }

    /// Sandbox plus the runtime services a trusted enterprise application needs.
    pub fn elevated_runtime(identity: &ApplicationIdentity) -> Self {
        let mut set = Self::sandbox(identity);
        set.capabilities.extend([
            Capability::Clipboard,
            Capability::ProcessExit,
            Capability::LoadLibrary,
            Capability::QueuePrintJob,
            Capability::connect("*"),
            Capability::NetworkListen {
                host: "localhost".to_string(),
                min_port: UNPRIVILEGED_PORT,
            },
            Capability::ReadFile { path: "*".to_string() },
            Capability::WriteFile { path: "*".to_string() },
            Capability::read_property("*"),
        ]);
        set
    }

    /// Every capability.
    pub fn unrestricted() -> Self {
        CapabilityGrantSet {
            capabilities: BTreeSet::new(),
            unrestricted: true,
        }
    }

    /// Exactly the given capabilities.
    pub fn from_capabilities(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        CapabilityGrantSet {
            capabilities: capabilities.into_iter().collect(),
            unrestricted: false,
        }
    }

    /// Copy of this set with one more capability.
    pub fn with(&self, capability: Capability) -> Self {
        let mut set = self.clone();
        if !set.unrestricted {
            set.capabilities.insert(capability);
        }
        set
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    pub fn is_empty(&self) -> bool {
        !self.unrestricted && self.capabilities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn permits(&self, requested: &Capability) -> bool {
        self.unrestricted || self.capabilities.iter().any(|held| held.implies(requested))
    }
}

/// Turns an outcome into the grant set the application runs with.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantBuilder {
    window_banner: bool,
}

impl GrantBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let sandboxed windows appear without the warning banner.
    pub fn with_window_banner(mut self, enabled: bool) -> Self {
        self.window_banner = enabled;
        self
    }

    /// Build the grant set. Pure; the second value is set when a configured
    /// authority could not resolve and the sandbox set was used instead.
    pub fn build(
        &self,
        outcome: Outcome,
        identity: &ApplicationIdentity,
        authority: Option<&dyn CustomAuthority>,
    ) -> (CapabilityGrantSet, Option<AuthorityError>) {
        match outcome {
            Outcome::Deny => (CapabilityGrantSet::none(), None),
            Outcome::Sandbox => (self.sandbox(identity), None),
            Outcome::Allow => match authority {
                Some(authority) => match authority.resolve(identity) {
                    Ok(grants) => (grants, None),
                    Err(e) => (self.sandbox(identity), Some(e)),
                },
                None => (self.allow(identity), None),
            },
        }
    }

    fn allow(&self, identity: &ApplicationIdentity) -> CapabilityGrantSet {
        match identity.requested {
            RequestedPermissions::Sandbox => self.sandbox(identity),
            _ if !identity.signing.is_fully_signed() => self.sandbox(identity),
            RequestedPermissions::ElevatedRuntime => CapabilityGrantSet::elevated_runtime(identity),
            RequestedPermissions::All => CapabilityGrantSet::unrestricted(),
        }
    }

    fn sandbox(&self, identity: &ApplicationIdentity) -> CapabilityGrantSet {
        let set = CapabilityGrantSet::sandbox(identity);
        if self.window_banner {
            set.with(Capability::ShowWindowWithoutBanner)
        } else {
            set
        }
    }
}
