//! Types specific to devsolve

use std::fmt;
use std::str::FromStr;

/// Error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An instance was initialized twice without being finalized in between
    #[error("This solver instance has already been initialized on this process")]
    AlreadyInitialized,
    /// An instance was finalized without having been initialized
    #[error("This solver instance has not been initialized")]
    NotInitialized,
    /// No device could be found on a node running in a device mode
    #[error("There is no device on the node {node} (rank {rank})")]
    NoDevices {
        /// Name of the node
        node: String,
        /// Global rank of the reporting process
        rank: usize,
    },
    /// The requested execution mode is unknown or not supported
    #[error("Mode not supported: {0}")]
    UnsupportedMode(String),
    /// A rank took part in a collective with an array whose length disagrees
    /// with the length it declared earlier
    #[error("Rank {rank} declared {declared} elements but holds {actual}")]
    LengthMismatch {
        /// Rank inside the group that detected the violation
        rank: usize,
        /// Declared length
        declared: usize,
        /// Actual length
        actual: usize,
    },
    /// A CSR fragment violates the row-pointer contract
    #[error("Invalid CSR fragment: {0}")]
    InvalidFragment(String),
    /// The input matrix block violates the input contract
    #[error("Invalid matrix block: {0}")]
    InvalidBlock(String),
    /// A communicator split left a process without the group it needs
    #[error("Communicator split failed: {0}")]
    Topology(String),
    /// A solve was requested before a matrix was set
    #[error("No matrix has been set on this solver")]
    MatrixNotSet,
    /// An engine call failed
    #[error("Solve engine error: {0}")]
    Engine(String),
    /// The engine finished a solve with a non-success status
    #[error("Solve engine failed to solve system, status {status}")]
    SolveFailed {
        /// Status reported by the engine
        status: SolveStatus,
    },
}

impl Error {
    /// Whether the error must abort the whole process group.
    ///
    /// Fatal errors leave the collectives of the other ranks unmatched, so
    /// continuing on any rank would deadlock the group.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::NotInitialized | Error::SolveFailed { .. })
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Execution mode of the solve engine.
///
/// The first letter selects host or device memory, the following letters the
/// precision of the vectors, the matrix and the index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Mode {
    /// Device, double vectors, double matrix, int indices
    dDDI,
    /// Device, double vectors, float matrix, int indices
    dDFI,
    /// Device, float vectors, float matrix, int indices
    dFFI,
    /// Host, double vectors, double matrix, int indices
    hDDI,
    /// Host, double vectors, float matrix, int indices
    hDFI,
    /// Host, float vectors, float matrix, int indices
    hFFI,
}

impl Mode {
    /// Whether the mode runs on accelerator devices
    pub fn is_device(&self) -> bool {
        matches!(self, Mode::dDDI | Mode::dDFI | Mode::dFFI)
    }

    /// Name of the mode as understood by the engine
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::dDDI => "dDDI",
            Mode::dDFI => "dDFI",
            Mode::dFFI => "dFFI",
            Mode::hDDI => "hDDI",
            Mode::hDFI => "hDFI",
            Mode::hFFI => "hFFI",
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dDDI" => Ok(Mode::dDDI),
            "dDFI" => Ok(Mode::dDFI),
            "dFFI" => Ok(Mode::dFFI),
            "hDDI" => Ok(Mode::hDDI),
            "hDFI" => Ok(Mode::hDFI),
            "hFFI" => Ok(Mode::hFFI),
            _ => Err(Error::UnsupportedMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a finished solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolveStatus {
    /// The solve converged
    Success,
    /// The solve failed
    Failed,
    /// The solve diverged
    Diverged,
    /// The solve stopped before converging
    NotConverged,
}

impl SolveStatus {
    /// Whether the status signals a converged solve
    pub fn is_success(&self) -> bool {
        *self == SolveStatus::Success
    }

    /// Integer code used to share the status inside a group
    pub fn code(&self) -> i32 {
        match self {
            SolveStatus::Success => 0,
            SolveStatus::Failed => 1,
            SolveStatus::Diverged => 2,
            SolveStatus::NotConverged => 3,
        }
    }

    /// Status for an integer code; unknown codes are failures
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => SolveStatus::Success,
            2 => SolveStatus::Diverged,
            3 => SolveStatus::NotConverged,
            _ => SolveStatus::Failed,
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// Resolve the number of devices a node works with.
///
/// Device modes need at least one detected device; host modes use one
/// "device" per node-local process.
pub fn resolve_device_count(
    mode: Mode,
    detected: usize,
    local_size: usize,
    node: &str,
    rank: usize,
) -> Result<usize> {
    if !mode.is_device() {
        return Ok(local_size);
    }
    if detected == 0 {
        return Err(Error::NoDevices {
            node: node.to_string(),
            rank,
        });
    }
    Ok(detected)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("dDDI".parse::<Mode>().unwrap(), Mode::dDDI);
        assert_eq!("hFFI".parse::<Mode>().unwrap(), Mode::hFFI);
        assert_eq!(
            "xDDI".parse::<Mode>(),
            Err(Error::UnsupportedMode("xDDI".to_string()))
        );
        for mode in [Mode::dDDI, Mode::dDFI, Mode::hDFI] {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_fatal() {
        assert!(Error::AlreadyInitialized.is_fatal());
        assert!(Error::LengthMismatch {
            rank: 0,
            declared: 1,
            actual: 2
        }
        .is_fatal());
        assert!(!Error::NotInitialized.is_fatal());
        assert!(!Error::SolveFailed {
            status: SolveStatus::Diverged
        }
        .is_fatal());
    }

    #[test]
    fn test_status_codes() {
        for s in [
            SolveStatus::Success,
            SolveStatus::Failed,
            SolveStatus::Diverged,
            SolveStatus::NotConverged,
        ] {
            assert_eq!(SolveStatus::from_code(s.code()), s);
        }
        assert_eq!(SolveStatus::from_code(17), SolveStatus::Failed);
    }

    #[test]
    fn test_device_count() {
        assert_eq!(resolve_device_count(Mode::dDDI, 2, 8, "n0", 0), Ok(2));
        assert_eq!(resolve_device_count(Mode::hDDI, 0, 8, "n0", 0), Ok(8));
        assert_eq!(
            resolve_device_count(Mode::dDDI, 0, 8, "n0", 3),
            Err(Error::NoDevices {
                node: "n0".to_string(),
                rank: 3
            })
        );
    }
}
