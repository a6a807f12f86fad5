use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Failures that can occur while interacting with MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("invalid MongoDB connection string `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to construct MongoDB client")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB did not answer the initial ping after {attempts} attempts")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB health ping failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to read `{path}` from MongoDB")]
    Read {
        path: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to merge fields into `{path}`")]
    Write {
        path: String,
        #[source]
        source: MongoError,
    },
    /// Change streams require a replica set or sharded cluster.
    #[error("failed to watch `{path}` for changes")]
    Watch {
        path: String,
        #[source]
        source: MongoError,
    },
}
