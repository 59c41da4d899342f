use mongodb::bson::doc;
use mongodb::{Client, Database};
use tracing::info;

use crate::errors::Result;

pub async fn connect(database_url: &str) -> Result<Database> {
    let client = Client::with_uri_str(database_url).await?;
    let db = client
        .default_database()
        .unwrap_or_else(|| client.database("tollgate"));

    // fail fast at startup rather than on the first request
    db.run_command(doc! { "ping": 1 }).await?;
    info!("connected to MongoDB database {}", db.name());

    Ok(db)
}
