mod common;
mod identity;
