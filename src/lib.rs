pub mod adjust;
pub mod classifier;
pub mod cleaner;
pub mod compositor;
pub mod crop;
pub mod encoding;
pub mod error_codes;
pub mod font_assets;
pub mod layout;
pub mod markup;
pub mod raster;
pub mod schema;
pub mod services;
pub mod session;
pub mod settings;
