//! CRUD facade over registered databases.

mod crud_model;
mod crud_service;
mod crud_traits;

pub use crud_model::{GetByIndexRequest, GetRequest, ListRequest, PutRequest};
pub use crud_service::CrudService;
pub use crud_traits::CrudServiceTrait;
