use serde::Serialize;

/// Server metadata. Config strings are opaque blobs handed verbatim to the
/// end user.
#[derive(Debug, Clone, Serialize)]
pub struct VpsServer {
    pub id: i64,
    pub country: String,
    pub flag: String,
    pub nickname: String,
    pub configs: Vec<String>,
    pub country_key: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VpsCountry {
    pub country: String,
    pub flag: String,
    pub country_key: String,
}
