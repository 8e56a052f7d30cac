// Pipeline logic and shared errors/models
pub mod orchestrator {
    pub use crate::orchestrator::*;
}

pub mod templates {
    pub use crate::templates::*;
}

pub mod dedup {
    pub use crate::dedup::*;
}

pub mod quality {
    pub use crate::quality::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
