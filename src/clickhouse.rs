use crate::document::Document;
use crate::error::StoreError;
use crate::http::{classify_request_error, classify_status};
use crate::store::DocumentStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

/// Configuration for [`ClickHouseStore`].
///
/// The store talks to ClickHouse over HTTP using the `JSONEachRow` format.
/// The sink's collection name is used as the target table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClickHouseConfig {
    /// Base URL without query, e.g. "http://127.0.0.1:8123"
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ClickHouseConfig {
    /// Parse the part of a `clickhouse://` destination after the scheme:
    /// `[user[:password]@]host:port[/database]`.
    pub fn from_address(address: &str) -> Result<Self, String> {
        let (credentials, location) = match address.rsplit_once('@') {
            Some((creds, loc)) => (Some(creds), loc),
            None => (None, address),
        };
        let (host, database) = match location.split_once('/') {
            Some((host, db)) if !db.trim_matches('/').is_empty() => (host, db.trim_matches('/')),
            Some((host, _)) => (host, "default"),
            None => (location, "default"),
        };
        if host.is_empty() {
            return Err("missing host".to_string());
        }

        let (user, password) = match credentials {
            None => (None, None),
            Some(creds) => match creds.split_once(':') {
                Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
                None => (Some(creds.to_string()), None),
            },
        };

        Ok(ClickHouseConfig {
            url: format!("http://{}", host),
            database: database.to_string(),
            user,
            password,
        })
    }
}

/// ClickHouse implementation of [`DocumentStore`] using the HTTP interface.
#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseStore {
    /// Construct a new store instance using the provided configuration.
    ///
    /// **Parameters**
    /// - `config`: [`ClickHouseConfig`] describing target URL, database
    ///   and optional authentication settings.
    pub fn new(config: ClickHouseConfig) -> Self {
        let client = Client::new();
        Self { client, config }
    }

    fn auth_query(&self) -> String {
        let mut query = String::new();
        if let Some(user) = &self.config.user {
            query.push_str(&format!("&user={}", urlencoding::encode(user)));
        }
        if let Some(password) = &self.config.password {
            query.push_str(&format!("&password={}", urlencoding::encode(password)));
        }
        query
    }

    fn endpoint(&self, table: &str) -> String {
        let query = format!("INSERT INTO {} FORMAT JSONEachRow", quote_identifier(table));
        format!(
            "{}/?database={}&query={}{}",
            self.config.url,
            urlencoding::encode(&self.config.database),
            urlencoding::encode(&query),
            self.auth_query()
        )
    }

    /// Validate that the target table exists and can be described.
    /// This is optional and is not called automatically.
    ///
    /// **Returns**
    /// - `Ok(())` if the `DESCRIBE TABLE` query succeeded.
    /// - `Err(..)` if ClickHouse responded with a non-success status.
    pub async fn validate_schema(&self, table: &str) -> Result<(), StoreError> {
        let url = format!(
            "{}/?query={}{}",
            self.config.url,
            urlencoding::encode(&format!(
                "DESCRIBE TABLE {}.{} FORMAT JSON",
                quote_identifier(&self.config.database),
                quote_identifier(table)
            )),
            self.auth_query()
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_request_error(e, "ClickHouse"))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        match classify_status(status, &text, "ClickHouse") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Backtick-quote an identifier so collection names cannot alter the query.
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Flat row layout; nested values are stored as JSON strings.
#[derive(Serialize, Debug, PartialEq)]
struct ClickHouseRow<'a> {
    timestamp: &'a str,
    level: &'a str,
    message: &'a str,
    rendered_message: &'a str,
    target: &'a str,
    module_path: Option<&'a str>,
    file: Option<&'a str>,
    line: Option<u64>,
    properties: String,
    exception: Option<String>,
}

fn str_field<'a>(doc: &'a Document, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(|v| v.as_str())
}

fn map_document(doc: &Document) -> ClickHouseRow<'_> {
    ClickHouseRow {
        timestamp: str_field(doc, "timestamp").unwrap_or_default(),
        level: str_field(doc, "level").unwrap_or_default(),
        message: str_field(doc, "message").unwrap_or_default(),
        rendered_message: str_field(doc, "rendered_message").unwrap_or_default(),
        target: str_field(doc, "target").unwrap_or_default(),
        module_path: str_field(doc, "module_path"),
        file: str_field(doc, "file"),
        line: doc.get("line").and_then(|v| v.as_u64()),
        properties: doc
            .get("properties")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string()),
        exception: doc.get("exception").map(|v| v.to_string()),
    }
}

#[async_trait]
impl DocumentStore for ClickHouseStore {
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
        let mut body = String::new();
        for doc in documents {
            let row = serde_json::to_string(&map_document(doc))
                .map_err(|e| StoreError::permanent("failed to encode row").with_source(e))?;
            body.push_str(&row);
            body.push('\n');
        }

        let resp = self
            .client
            .post(self.endpoint(collection))
            .body(body)
            .send()
            .await
            .map_err(|e| classify_request_error(e, "ClickHouse"))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(documents.len());
        }
        let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        Err(classify_status(status, &text, "ClickHouse")
            .unwrap_or_else(|| StoreError::transient("ClickHouse insert failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_address_with_credentials() {
        let config = ClickHouseConfig::from_address("writer:s3cret@127.0.0.1:8123/logs").unwrap();
        assert_eq!(
            config,
            ClickHouseConfig {
                url: "http://127.0.0.1:8123".into(),
                database: "logs".into(),
                user: Some("writer".into()),
                password: Some("s3cret".into()),
            }
        );
    }

    #[test]
    fn parses_address_defaults() {
        let config = ClickHouseConfig::from_address("localhost:8123").unwrap();
        assert_eq!(config.database, "default");
        assert!(config.user.is_none());
        assert!(ClickHouseConfig::from_address("/db").is_err());
    }

    #[test]
    fn endpoint_encodes_insert_query() {
        let store = ClickHouseStore::new(ClickHouseConfig::from_address("u:p w@h:8123/db").unwrap());
        assert_eq!(
            store.endpoint("log"),
            "http://h:8123/?database=db&query=INSERT%20INTO%20%60log%60%20FORMAT%20JSONEachRow&user=u&password=p%20w"
        );
    }

    #[test]
    fn table_names_are_quoted() {
        assert_eq!(quote_identifier("log"), "`log`");
        assert_eq!(quote_identifier("log` FORMAT CSV --"), "`log\\` FORMAT CSV --`");
        assert_eq!(quote_identifier("a\\b"), "`a\\\\b`");
    }

    #[test]
    fn document_maps_to_flat_row() {
        let doc = json!({
            "timestamp": "2024-05-01T12:00:00+00:00",
            "level": "ERROR",
            "message": "order failed",
            "rendered_message": "order failed",
            "target": "shop",
            "line": 42,
            "properties": {"order_id": 123}
        });
        let row = map_document(&doc);
        assert_eq!(row.level, "ERROR");
        assert_eq!(row.line, Some(42));
        assert_eq!(row.properties, r#"{"order_id":123}"#);
        assert!(row.exception.is_none());
        assert!(row.file.is_none());
    }
}
