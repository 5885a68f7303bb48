use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error types for port mapping operations
#[derive(Debug, Error)]
pub enum NatError {
    /// UPnP IGD errors
    #[error("UPnP error: {0}")]
    Upnp(#[from] UpnpError),

    /// Network I/O errors
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout errors
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The outbound-facing local address could not be determined
    #[error("Cannot determine local address: {0}")]
    LocalAddress(String),
}

/// UPnP IGD specific errors
#[derive(Debug, Error)]
pub enum UpnpError {
    /// HTTP error
    #[error("HTTP error {code}: {reason}")]
    HttpError { code: u16, reason: String },

    /// Connection-level failure talking to the gateway
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// XML parsing error
    #[error("XML parsing error: {0}")]
    XmlParseError(String),

    /// URL that cannot be used to reach the gateway
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid response
    #[error("Invalid UPnP response: {0}")]
    InvalidResponse(String),
}

/// UPnP IGD error codes carried in SOAP faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum UpnpErrorCode {
    /// Invalid action
    InvalidAction = 401,

    /// Invalid args
    InvalidArgs = 402,

    /// Invalid variable
    InvalidVariable = 404,

    /// Action failed
    ActionFailed = 501,

    /// Argument value invalid
    ArgumentValueInvalid = 600,

    /// Argument value out of range
    ArgumentValueOutOfRange = 601,

    /// Optional action not implemented
    OptionalActionNotImplemented = 602,

    /// Out of memory
    OutOfMemory = 603,

    /// Action not authorized
    ActionNotAuthorized = 606,

    /// Port mapping not found
    NoSuchEntryInArray = 714,

    /// Wild card not permitted in source IP
    WildCardNotPermittedInSrcIp = 715,

    /// Wild card not permitted in external port
    WildCardNotPermittedInExtPort = 716,

    /// Port mapping conflict
    ConflictInMappingEntry = 718,

    /// Same port values required
    SamePortValuesRequired = 724,

    /// Only permanent lease supported
    OnlyPermanentLeasesSupported = 725,

    /// Remote host only supports wildcard
    RemoteHostOnlySupportsWildcard = 726,

    /// External port only supports wildcard
    ExternalPortOnlySupportsWildcard = 727,

    /// No port maps available
    NoPortMapsAvailable = 728,

    /// Conflict with other mechanism
    ConflictWithOtherMechanism = 729,
}

impl fmt::Display for UpnpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAction => write!(f, "Invalid Action"),
            Self::InvalidArgs => write!(f, "Invalid Arguments"),
            Self::InvalidVariable => write!(f, "Invalid Variable"),
            Self::ActionFailed => write!(f, "Action Failed"),
            Self::ArgumentValueInvalid => write!(f, "Argument Value Invalid"),
            Self::ArgumentValueOutOfRange => write!(f, "Argument Value Out of Range"),
            Self::OptionalActionNotImplemented => write!(f, "Optional Action Not Implemented"),
            Self::OutOfMemory => write!(f, "Out of Memory"),
            Self::ActionNotAuthorized => write!(f, "Action Not Authorized"),
            Self::NoSuchEntryInArray => write!(f, "No Such Entry in Array"),
            Self::WildCardNotPermittedInSrcIp => write!(f, "Wildcard Not Permitted in Source IP"),
            Self::WildCardNotPermittedInExtPort => write!(f, "Wildcard Not Permitted in External Port"),
            Self::ConflictInMappingEntry => write!(f, "Conflict in Mapping Entry"),
            Self::SamePortValuesRequired => write!(f, "Same Port Values Required"),
            Self::OnlyPermanentLeasesSupported => write!(f, "Only Permanent Leases Supported"),
            Self::RemoteHostOnlySupportsWildcard => write!(f, "Remote Host Only Supports Wildcard"),
            Self::ExternalPortOnlySupportsWildcard => write!(f, "External Port Only Supports Wildcard"),
            Self::NoPortMapsAvailable => write!(f, "No Port Maps Available"),
            Self::ConflictWithOtherMechanism => write!(f, "Conflict with Other Mechanism"),
        }
    }
}

impl UpnpErrorCode {
    /// Convert from the numeric `errorCode` of a SOAP fault
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            401 => Some(Self::InvalidAction),
            402 => Some(Self::InvalidArgs),
            404 => Some(Self::InvalidVariable),
            501 => Some(Self::ActionFailed),
            600 => Some(Self::ArgumentValueInvalid),
            601 => Some(Self::ArgumentValueOutOfRange),
            602 => Some(Self::OptionalActionNotImplemented),
            603 => Some(Self::OutOfMemory),
            606 => Some(Self::ActionNotAuthorized),
            714 => Some(Self::NoSuchEntryInArray),
            715 => Some(Self::WildCardNotPermittedInSrcIp),
            716 => Some(Self::WildCardNotPermittedInExtPort),
            718 => Some(Self::ConflictInMappingEntry),
            724 => Some(Self::SamePortValuesRequired),
            725 => Some(Self::OnlyPermanentLeasesSupported),
            726 => Some(Self::RemoteHostOnlySupportsWildcard),
            727 => Some(Self::ExternalPortOnlySupportsWildcard),
            728 => Some(Self::NoPortMapsAvailable),
            729 => Some(Self::ConflictWithOtherMechanism),
            _ => None,
        }
    }

    /// Numeric code as sent by the gateway
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if a later attempt can reasonably succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConflictInMappingEntry |
            Self::NoPortMapsAvailable |
            Self::OutOfMemory |
            Self::ActionFailed
        )
    }
}

/// Result type for NAT operations
pub type NatResult<T> = Result<T, NatError>;

/// Convert I/O errors to NAT errors with context
pub trait IoErrorContext<T> {
    fn nat_context(self, context: &str) -> NatResult<T>;
}

impl<T> IoErrorContext<T> for io::Result<T> {
    fn nat_context(self, context: &str) -> NatResult<T> {
        self.map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                NatError::Io(e)
            } else {
                NatError::Upnp(UpnpError::Transport(format!("{}: {}", context, e)))
            }
        })
    }
}
