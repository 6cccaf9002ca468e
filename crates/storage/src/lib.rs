pub mod db;
pub mod gateway;

pub use db::{create_db, DbPool};
pub use gateway::{list_invoices, upsert_invoice, InvoiceRecord, SqliteGateway};
