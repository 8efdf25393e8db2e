pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod reviews;
pub(crate) mod router;
pub(crate) mod schemes;
pub(crate) mod scripts;
pub(crate) mod sessions;
pub(crate) mod ws;
