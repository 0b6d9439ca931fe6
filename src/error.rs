#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid annotation pattern: {0}")]
    AnnotationPatternError(#[from] regex::Error),

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),

    #[error("Unsupported workload kind: {0}")]
    UnsupportedKind(String),
}

impl Error {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}
