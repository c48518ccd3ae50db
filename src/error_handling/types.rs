use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    NotInRange(String),
    MissingValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures of the file repository. Names are carried as given by the client.
#[derive(Debug)]
pub enum RepositoryError {
    InvalidName(String),
    NotFound(String),
    IoError(std::io::Error),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::InvalidName(name) => write!(f, "Invalid file name: {:?}", name),
            RepositoryError::NotFound(name) => write!(f, "File not found: {}", name),
            RepositoryError::IoError(e) => write!(f, "Repository IO error: {}", e),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// The repository operation a failure happened in, used to pick the wire text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    List,
    Read,
    Write,
    Delete,
    Search,
    Stat,
}

/// A failure local to one command. The session always stays open.
#[derive(Debug, PartialEq)]
pub enum CommandError {
    Usage(&'static str),
    UnknownCommand,
    PermissionDenied,
    NotFound,
    InvalidName,
    InvalidPayload,
    Io(FileOp),
    AlreadyIdentified(String),
    PasswordAuthDisabled,
    WrongPassword { attempt: u32, max: u32 },
    LineTooLong(usize),
}

impl CommandError {
    pub fn to_wire(&self) -> String {
        format!("ERROR {}", self)
    }

    /// Maps a repository failure onto its wire form. Only storage faults are
    /// logged, a missing file or a bad name is the client's business.
    pub fn from_repository(op: FileOp, err: RepositoryError) -> Self {
        match err {
            RepositoryError::InvalidName(_) => CommandError::InvalidName,
            RepositoryError::NotFound(_) => CommandError::NotFound,
            RepositoryError::IoError(e) => {
                log::error!("Repository {:?} failed: {}", op, e);
                CommandError::Io(op)
            }
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Usage(form) => write!(f, "usage: {}", form),
            CommandError::UnknownCommand => write!(f, "unknown command"),
            CommandError::PermissionDenied => write!(f, "permission denied"),
            CommandError::NotFound => write!(f, "file not found"),
            CommandError::InvalidName => write!(f, "invalid filename"),
            CommandError::InvalidPayload => write!(f, "invalid base64 payload"),
            CommandError::Io(op) => match op {
                FileOp::List => write!(f, "listing files"),
                FileOp::Read => write!(f, "reading file"),
                FileOp::Write => write!(f, "writing file"),
                FileOp::Delete => write!(f, "deleting file"),
                FileOp::Search => write!(f, "searching files"),
                FileOp::Stat => write!(f, "reading file info"),
            },
            CommandError::AlreadyIdentified(name) => write!(f, "already identified as {}", name),
            CommandError::PasswordAuthDisabled => write!(f, "password elevation is disabled"),
            CommandError::WrongPassword { attempt, max } if attempt >= max => write!(
                f,
                "wrong password. Too many failed attempts, closing connection."
            ),
            CommandError::WrongPassword { attempt, max } => {
                write!(f, "wrong password (attempt {} of {})", attempt, max)
            }
            CommandError::LineTooLong(limit) => {
                write!(f, "line too long (limit {} bytes)", limit)
            }
        }
    }
}

impl std::error::Error for CommandError {}

#[derive(Debug)]
pub enum SessionError {
    DuplicateId(String),
    NotFound(String),
    IoError(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DuplicateId(id) => write!(f, "Session {} is already known", id),
            SessionError::NotFound(id) => write!(f, "Session {} not found", id),
            SessionError::IoError(e) => write!(f, "Session IO error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::IoError(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    AcceptError(std::io::Error),
    LocalAddrError(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::AcceptError(e) => write!(f, "Accept failed: {}", e),
            NetworkError::LocalAddrError(e) => write!(f, "Local address unavailable: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum StorageError {
    WriteFailed(String),
    SerializationFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::SerializationFailed(e) => write!(f, "Serialization failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    RepositoryError(RepositoryError),
    StorageError(StorageError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::RepositoryError(e) => write!(f, "Repository error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<RepositoryError> for ControllerError {
    fn from(err: RepositoryError) -> Self {
        ControllerError::RepositoryError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}
