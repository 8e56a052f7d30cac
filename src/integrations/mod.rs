//! External service integrations.

pub mod llm_client {
    pub use crate::llm_client::*;
}

pub mod geocoding_client {
    pub use crate::geocoding_client::*;
}

pub mod geocoding {
    pub use crate::geocoding::*;
}
