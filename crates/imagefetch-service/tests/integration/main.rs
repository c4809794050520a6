mod errors;
mod fetch;
mod utils;
