//! External provider clients.

mod google;

pub use google::GooglePlacesProvider;
