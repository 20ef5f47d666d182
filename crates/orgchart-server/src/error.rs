use orgchart_core::error::OrgChartError;
use orgchart_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid value for {variable}: {value:?}")]
    Config {
        variable: &'static str,
        value: String,
    },

    #[error("Database connection failed: {0}")]
    Connect(#[from] surrealdb::Error),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Directory(#[from] OrgChartError),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}
