//! Database entities

pub mod captured_request;
pub mod endpoint;
pub mod owner;

pub use captured_request::Entity as CapturedRequest;
pub use endpoint::Entity as Endpoint;
pub use owner::Entity as Owner;

pub mod prelude {
    pub use super::captured_request::Entity as CapturedRequest;
    pub use super::endpoint::Entity as Endpoint;
    pub use super::owner::Entity as Owner;
}
