// Catalog transports
mod http;

pub use http::HttpCatalogTransport;
