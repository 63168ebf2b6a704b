use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use tracing_docstore_sink::{
    document::Document,
    init::init_tracing,
    store::DocumentStore,
    StoreError,
};

/// Example of integrating a completely custom backend by implementing
/// the `DocumentStore` trait directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// store.
struct MyCustomDbStore;

#[async_trait]
impl DocumentStore for MyCustomDbStore {
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize, StoreError> {
        // Here you would call your own client library for the target DB.
        // For the sake of example we just print the documents.
        for doc in documents {
            println!("[my-custom-db/{}] {}", collection, doc);
        }
        Ok(documents.len())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn DocumentStore> = Arc::new(MyCustomDbStore);

    let guard = init_tracing(store)?;

    info!("custom backend example started");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    guard.close().await;
    Ok(())
}
