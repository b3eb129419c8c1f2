//! MongoDB backend.
//!
//! Collections stand in for tables. Schemas are inferred from a sample of
//! documents and the collection's index definitions.

use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};

use common::config::PoolConfig;
use common::errors::{AppError, AppResult};
use common::models::{ColumnSchema, Record};
use common::utils::IdentifierValidator;

use super::value::{bson_type_name, document_to_record};
use super::{query_error, with_deadline, MONGO_RECORD_LIMIT, PING_TIMEOUT};

/// `mongodb+srv` strings resolve DNS while parsing, so lookup failures are
/// connectivity errors rather than bad input.
fn parse_error(e: MongoError) -> AppError {
    match e.kind.as_ref() {
        ErrorKind::DnsResolve { .. } | ErrorKind::Io(_) => AppError::ConnectFailed(e.to_string()),
        _ => AppError::MalformedConnectionString(e.to_string()),
    }
}

pub(super) async fn open(conn_str: &str, config: &PoolConfig) -> AppResult<Client> {
    let mut options = with_deadline(PING_TIMEOUT, async {
        ClientOptions::parse(conn_str).await.map_err(parse_error)
    })
    .await?;
    options.max_pool_size = Some(config.max_open_conns);
    options.max_idle_time = Some(config.conn_max_idle_time);
    options.server_selection_timeout = Some(PING_TIMEOUT);
    options.connect_timeout = Some(PING_TIMEOUT);

    Client::with_options(options).map_err(|e| AppError::ConnectFailed(e.to_string()))
}

pub(super) async fn ping(client: &Client) -> AppResult<()> {
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map(drop)
        .map_err(|e| AppError::ConnectFailed(e.to_string()))
}

pub(super) async fn close(client: &Client) {
    client.clone().shutdown().immediate(true).await;
}

/// Resolves the explicit database name, falling back to the one in the
/// connection string.
fn database(client: &Client, db_name: Option<&str>) -> AppResult<Database> {
    match db_name.filter(|n| !n.is_empty()) {
        Some(name) => Ok(client.database(name)),
        None => client
            .default_database()
            .ok_or_else(|| AppError::Validation("MongoDB operations need a database name".into())),
    }
}

pub(super) async fn list_collections(client: &Client, db_name: Option<&str>) -> AppResult<Vec<String>> {
    let mut names = database(client, db_name)?
        .list_collection_names()
        .await
        .map_err(query_error)?;
    names.sort();
    Ok(names)
}

async fn find_documents(db: &Database, collection: &str) -> AppResult<Vec<Document>> {
    db.collection::<Document>(collection)
        .find(doc! {})
        .limit(MONGO_RECORD_LIMIT)
        .await
        .map_err(query_error)?
        .try_collect()
        .await
        .map_err(query_error)
}

pub(super) async fn collection_records(
    client: &Client,
    db_name: Option<&str>,
    collection: &str,
) -> AppResult<Vec<Record>> {
    let db = database(client, db_name)?;
    let docs = find_documents(&db, collection).await?;
    Ok(docs.into_iter().map(document_to_record).collect())
}

pub(super) async fn collection_schema(
    client: &Client,
    db_name: Option<&str>,
    collection: &str,
) -> AppResult<Vec<ColumnSchema>> {
    let db = database(client, db_name)?;
    let sample = find_documents(&db, collection).await?;
    let mut columns = infer_columns(&sample);

    let indexes: Vec<_> = db
        .collection::<Document>(collection)
        .list_indexes()
        .await
        .map_err(query_error)?
        .try_collect()
        .await
        .map_err(query_error)?;
    for index in indexes {
        let options = index.options.unwrap_or_default();
        let name = options.name.unwrap_or_default();
        let unique = options.unique.unwrap_or(false);
        let single_field = index.keys.len() == 1;
        for field in index.keys.keys() {
            if let Some(col) = columns.iter_mut().find(|c| &c.name == field) {
                col.indexes.push(name.clone());
                col.is_unique |= unique && single_field;
            }
        }
    }

    Ok(columns)
}

/// Field name, observed types and nullability across `sample`, in first-seen order.
fn infer_columns(sample: &[Document]) -> Vec<ColumnSchema> {
    let mut columns: Vec<(ColumnSchema, Vec<&'static str>, usize)> = Vec::new();

    for doc in sample {
        for (field, value) in doc {
            let idx = match columns.iter().position(|(c, _, _)| &c.name == field) {
                Some(idx) => idx,
                None => {
                    columns.push((ColumnSchema::new(field.clone(), ""), Vec::new(), 0));
                    columns.len() - 1
                }
            };
            let (_, types, present) = &mut columns[idx];
            let type_name = bson_type_name(value);
            if type_name != "null" {
                *present += 1;
                if !types.contains(&type_name) {
                    types.push(type_name);
                }
            }
        }
    }

    columns
        .into_iter()
        .map(|(mut col, types, present)| {
            col.data_type = if types.is_empty() {
                "null".to_string()
            } else {
                types.join("|")
            };
            col.is_nullable = present < sample.len();
            if col.name == "_id" {
                col.is_primary_key = true;
                col.is_unique = true;
            }
            col
        })
        .collect()
}

/// Only full-collection enumeration is supported: `text` names the collection.
pub(super) async fn run_query(client: &Client, db_name: Option<&str>, text: &str) -> AppResult<Vec<Record>> {
    let collection = text.trim();
    let known = list_collections(client, db_name).await?;
    IdentifierValidator::ensure_listed(collection, &known).map_err(|_| {
        AppError::Query(format!(
            "MongoDB queries must name an existing collection, got '{collection}'"
        ))
    })?;
    collection_records(client, db_name, collection).await
}
