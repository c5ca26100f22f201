use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Application protocols guessed from the destination port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ApplicationProtocol {
    FTP,
    SSH,
    TELNET,
    SMTP,
    DNS,
    DHCP,
    HTTP,
    POP3,
    IMAP,
    HTTPS,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ApplicationProtocol {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FTP => "FTP",
            Self::SSH => "SSH",
            Self::TELNET => "TELNET",
            Self::SMTP => "SMTP",
            Self::DNS => "DNS",
            Self::DHCP => "DHCP",
            Self::HTTP => "HTTP",
            Self::POP3 => "POP3",
            Self::IMAP => "IMAP",
            Self::HTTPS => "HTTPS",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ApplicationProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Well-known destination ports, in display order.
///
/// Histogram columns follow the order in which labels first appear here.
pub const WELL_KNOWN_PORTS: &[(u16, ApplicationProtocol)] = &[
    (21, ApplicationProtocol::FTP),
    (22, ApplicationProtocol::SSH),
    (23, ApplicationProtocol::TELNET),
    (25, ApplicationProtocol::SMTP),
    (53, ApplicationProtocol::DNS),
    (67, ApplicationProtocol::DHCP),
    (68, ApplicationProtocol::DHCP),
    (80, ApplicationProtocol::HTTP),
    (110, ApplicationProtocol::POP3),
    (143, ApplicationProtocol::IMAP),
    (443, ApplicationProtocol::HTTPS),
];

/// Read-only port to protocol table
#[derive(Debug, Clone, Copy)]
pub struct ProtocolTable {
    entries: &'static [(u16, ApplicationProtocol)],
}

impl Default for ProtocolTable {
    fn default() -> Self {
        Self::new(WELL_KNOWN_PORTS)
    }
}

impl ProtocolTable {
    pub const fn new(entries: &'static [(u16, ApplicationProtocol)]) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, port: u16) -> Option<ApplicationProtocol> {
        self.entries
            .iter()
            .find(|(entry_port, _)| *entry_port == port)
            .map(|(_, protocol)| *protocol)
    }

    /// Table label for `port`, or `Unknown`
    pub fn classify(&self, port: u16) -> ApplicationProtocol {
        self.lookup(port).unwrap_or(ApplicationProtocol::Unknown)
    }

    /// Distinct protocols in first-appearance order, `Unknown` last
    pub fn labels(&self) -> Vec<ApplicationProtocol> {
        let mut labels: Vec<ApplicationProtocol> = Vec::new();
        for (_, protocol) in self.entries {
            if !labels.contains(protocol) {
                labels.push(*protocol);
            }
        }
        labels.push(ApplicationProtocol::Unknown);
        labels
    }

    /// Stable column index of `protocol`, matching `labels()`
    pub fn index_of(&self, protocol: ApplicationProtocol) -> Option<usize> {
        self.labels().iter().position(|label| *label == protocol)
    }
}

/// What happens to packets whose destination port is not in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationPolicy {
    /// Drop the packet
    #[default]
    Strict,
    /// Keep the packet, labelled "unknown"
    Permissive,
}

/// Port-based application protocol identifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolIdentifier {
    table: ProtocolTable,
    policy: ClassificationPolicy,
}

impl ProtocolIdentifier {
    pub fn new(policy: ClassificationPolicy) -> Self {
        Self {
            table: ProtocolTable::default(),
            policy,
        }
    }

    pub fn with_table(table: ProtocolTable, policy: ClassificationPolicy) -> Self {
        Self { table, policy }
    }

    pub fn table(&self) -> &ProtocolTable {
        &self.table
    }

    pub fn policy(&self) -> ClassificationPolicy {
        self.policy
    }

    /// Identify the application protocol for `destination_port`.
    /// `None` means the packet is dropped under the current policy.
    pub fn identify(&self, destination_port: u16) -> Option<ApplicationProtocol> {
        match (self.table.lookup(destination_port), self.policy) {
            (Some(protocol), _) => Some(protocol),
            (None, ClassificationPolicy::Permissive) => Some(ApplicationProtocol::Unknown),
            (None, ClassificationPolicy::Strict) => None,
        }
    }
}
