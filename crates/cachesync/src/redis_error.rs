//! Redis error mapping.

use cachesync_core::broker::BrokerError;
use cachesync_core::cache::CacheError;

fn is_connection_error(err: &redis::RedisError) -> bool {
    err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped()
}

/// Maps Redis errors to CacheError.
pub fn map_redis_error(err: redis::RedisError) -> CacheError {
    if is_connection_error(&err) {
        CacheError::ConnectionFailed(err.to_string())
    } else {
        CacheError::OperationFailed(err.to_string())
    }
}

/// Maps Redis errors to BrokerError.
///
/// Connection problems become `ConnectionFailed`; anything else is
/// wrapped by `otherwise`, which names the failed broker operation.
pub fn map_broker_error(
    err: redis::RedisError,
    otherwise: fn(String) -> BrokerError,
) -> BrokerError {
    if is_connection_error(&err) {
        BrokerError::ConnectionFailed(err.to_string())
    } else {
        otherwise(err.to_string())
    }
}
