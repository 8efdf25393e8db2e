pub(crate) mod evaluations;
pub(crate) mod reviews;
pub(crate) mod schemes;
pub(crate) mod scripts;
pub(crate) mod sessions;
