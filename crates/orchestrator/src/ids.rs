//! Identifiers: a short type prefix and a UUIDv7, so ids sort by creation time

use uuid::Uuid;

pub const RUN_PREFIX: &str = "run";
pub const ARTIFACT_PREFIX: &str = "art";

pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::now_v7().simple())
}
