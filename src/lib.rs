pub mod api;
pub mod bundling;
pub mod config;
pub mod error;
pub mod input;
pub mod request;
pub mod results;

pub use api::ScoringClient;
pub use config::{load_dotenv, ApiSettings, Credentials, RequestOptions};
pub use error::ScoreError;
pub use input::{Record, TextInput};
pub use request::request;
pub use results::ResultTable;
