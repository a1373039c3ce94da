//! Backend error-code catalog
//!
//! The array answers every request with `{error:{code,description}, data}`.
//! Code `0` is success; the codes below carry idempotence or retry meaning
//! for the facades. Anything not listed is fatal for the calling operation.

pub const SUCCESS: i64 = 0;

// =============================================================================
// Session
// =============================================================================

pub const UNAUTHORIZED: i64 = -401;
pub const USER_OFFLINE: i64 = 1077949069;
pub const SESSION_EXPIRED: i64 = 1077949070;

// =============================================================================
// Retryable
// =============================================================================

pub const SYSTEM_BUSY: i64 = 1077949006;
pub const MESSAGE_TIMEOUT: i64 = 1077949001;

// =============================================================================
// Already exists
// =============================================================================

pub const OBJECT_NAME_ALREADY_EXIST: i64 = 1077948993;
pub const SHARE_ALREADY_EXIST: i64 = 1077939724;
pub const SHARE_PATH_ALREADY_EXIST: i64 = 1077940500;
pub const CLIENT_ALREADY_EXIST: i64 = 1077939727;
pub const DTFS_USER_ALREADY_EXIST: i64 = 1077939740;
pub const INITIATOR_ALREADY_EXIST: i64 = 1077948945;
pub const HOST_ALREADY_IN_HOSTGROUP: i64 = 1077937501;
pub const LUN_ALREADY_IN_LUNGROUP: i64 = 1077936862;
pub const OBJECT_ALREADY_IN_MAPPING: i64 = 1073804556;

// =============================================================================
// Not found
// =============================================================================

pub const OBJECT_NOT_EXIST: i64 = 1077948996;
pub const FILESYSTEM_NOT_EXIST: i64 = 1073752065;
pub const SHARE_NOT_EXIST: i64 = 1077939717;
pub const SHARE_PATH_INVALID: i64 = 1077939729;
pub const LUN_NOT_EXIST: i64 = 1077936859;
pub const HOST_NOT_EXIST: i64 = 1077937498;
pub const QOS_NOT_EXIST: i64 = 1077948998;
pub const PAIR_NOT_EXIST: i64 = 1077674242;
pub const OBJECT_ID_NOT_UNIQUE: i64 = 1077948997;
pub const LUN_NOT_IN_LUNGROUP: i64 = 1077936863;

/// Session expired or credentials revoked; the call layer re-logs in
pub fn is_auth_failure(code: i64) -> bool {
    matches!(code, UNAUTHORIZED | USER_OFFLINE | SESSION_EXPIRED)
}

/// Array is temporarily unable to serve; facades retry at a fixed interval
pub fn is_retryable(code: i64) -> bool {
    matches!(code, SYSTEM_BUSY | MESSAGE_TIMEOUT)
}

/// Create requests that hit one of these codes are treated as success
pub fn is_already_exists(code: i64) -> bool {
    matches!(
        code,
        OBJECT_NAME_ALREADY_EXIST
            | SHARE_ALREADY_EXIST
            | SHARE_PATH_ALREADY_EXIST
            | CLIENT_ALREADY_EXIST
            | DTFS_USER_ALREADY_EXIST
            | INITIATOR_ALREADY_EXIST
            | HOST_ALREADY_IN_HOSTGROUP
            | LUN_ALREADY_IN_LUNGROUP
            | OBJECT_ALREADY_IN_MAPPING
    )
}

/// Delete and lookup requests that hit one of these codes mean "absent"
pub fn is_not_found(code: i64) -> bool {
    matches!(
        code,
        OBJECT_NOT_EXIST
            | FILESYSTEM_NOT_EXIST
            | SHARE_NOT_EXIST
            | SHARE_PATH_INVALID
            | LUN_NOT_EXIST
            | HOST_NOT_EXIST
            | QOS_NOT_EXIST
            | PAIR_NOT_EXIST
            | OBJECT_ID_NOT_UNIQUE
            | LUN_NOT_IN_LUNGROUP
    )
}
