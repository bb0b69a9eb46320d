//! Payload capacity queries.
//!
//! Limits depend on the peer: same-host delivery advertises larger
//! maxima than the network path. The least upper bound over all peers
//! is therefore the network value, and configuration validation pins
//! it at or above [`MIN_MEDIUM`] so clients can size conservative
//! buffers without asking.

use crate::config::AmConfig;
use crate::flags::{Category, Direction, LcOpt, SendFlags};

/// Hard payload limit for one category toward one class of peer.
pub(crate) fn max_payload(config: &AmConfig, cat: Category, nbrhd: bool) -> usize {
    match cat {
        Category::Short => 0,
        Category::Medium => {
            if nbrhd {
                config.nbrhd_max_medium
            } else {
                config.max_medium
            }
        }
        Category::Long => {
            if nbrhd {
                config.nbrhd_max_long
            } else {
                config.max_long
            }
        }
    }
}

/// Least upper bound of `max_payload` over every possible peer.
pub(crate) fn lub(config: &AmConfig, cat: Category) -> usize {
    max_payload(config, cat, false).min(max_payload(config, cat, true))
}

/// Rejects argument combinations no capacity query or prepare may be
/// given. Debug builds only.
pub(crate) fn check_query_args(dir: Direction, lc: &LcOpt, flags: SendFlags, nargs: u8) {
    #[cfg(debug_assertions)]
    {
        use crate::args::MAX_ARGS;
        if usize::from(nargs) > MAX_ARGS {
            panic!(
                "query names {} arguments, limit is {}",
                nargs, MAX_ARGS
            );
        }
        if flags.contains(SendFlags::LEAST_CLIENT) && flags.contains(SendFlags::LEAST_ALLOC) {
            panic!("LEAST_CLIENT and LEAST_ALLOC are mutually exclusive");
        }
        if dir == Direction::Reply {
            check_reply_lc(lc);
        }
    }
    #[cfg(not(debug_assertions))]
    let _ = (dir, lc, flags, nargs);
}

/// Rejects local completion modes replies cannot use. Debug builds
/// only.
pub(crate) fn check_reply_lc(lc: &LcOpt) {
    #[cfg(debug_assertions)]
    match lc {
        LcOpt::Defer => panic!("deferred local completion is not available for replies"),
        LcOpt::Group => panic!("group local completion is only available for requests"),
        _ => {}
    }
    #[cfg(not(debug_assertions))]
    let _ = lc;
}

/// Answers a capacity query, with debug checks on both the arguments
/// and the answer. Deferred completion is rejected for every query,
/// request-bound ones included.
pub(crate) fn query(
    config: &AmConfig,
    dir: Direction,
    cat: Category,
    nbrhd: bool,
    lc: &LcOpt,
    flags: SendFlags,
    nargs: u8,
) -> usize {
    check_query_args(dir, lc, flags, nargs);
    #[cfg(debug_assertions)]
    if matches!(lc, LcOpt::Defer) {
        panic!("deferred local completion is never legal for a capacity query");
    }
    let result = max_payload(config, cat, nbrhd);
    #[cfg(debug_assertions)]
    {
        use crate::config::MIN_MEDIUM;
        assert!(
            result >= MIN_MEDIUM,
            "advertised limit {} is below the guaranteed floor {}",
            result,
            MIN_MEDIUM
        );
        if !flags.intersects(SendFlags::LEAST_CLIENT | SendFlags::LEAST_ALLOC) {
            assert!(
                result >= lub(config, cat),
                "per-peer limit {} fell below the least upper bound {}",
                result,
                lub(config, cat)
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_MEDIUM;

    #[test]
    fn test_default_limits() {
        let config = AmConfig::default();
        assert_eq!(max_payload(&config, Category::Medium, false), 4096);
        assert_eq!(max_payload(&config, Category::Medium, true), 64 << 10);
        assert_eq!(max_payload(&config, Category::Long, false), 1 << 20);
        assert_eq!(max_payload(&config, Category::Short, true), 0);
    }

    #[test]
    fn test_lub_is_network_limit() {
        let config = AmConfig::default();
        assert_eq!(lub(&config, Category::Medium), config.max_medium);
        assert_eq!(lub(&config, Category::Long), config.max_long);
    }

    #[test]
    fn test_query_favors_neighborhood() {
        let config = AmConfig::default();
        let net = query(
            &config,
            Direction::Request,
            Category::Medium,
            false,
            &LcOpt::Now,
            SendFlags::empty(),
            4,
        );
        let near = query(
            &config,
            Direction::Request,
            Category::Medium,
            true,
            &LcOpt::Now,
            SendFlags::empty(),
            4,
        );
        assert!(near >= net);
        assert!(net >= MIN_MEDIUM);
    }

    #[test]
    fn test_least_flag_alone_is_accepted() {
        let config = AmConfig::default();
        let limit = query(
            &config,
            Direction::Request,
            Category::Medium,
            false,
            &LcOpt::Now,
            SendFlags::LEAST_CLIENT,
            0,
        );
        assert_eq!(limit, config.max_medium);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "mutually exclusive")]
    fn test_both_least_flags_panic() {
        let config = AmConfig::default();
        let _ = query(
            &config,
            Direction::Request,
            Category::Medium,
            false,
            &LcOpt::Now,
            SendFlags::LEAST_CLIENT | SendFlags::LEAST_ALLOC,
            0,
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "deferred local completion")]
    fn test_deferred_reply_completion_panics() {
        let config = AmConfig::default();
        let _ = query(
            &config,
            Direction::Reply,
            Category::Medium,
            false,
            &LcOpt::Defer,
            SendFlags::empty(),
            0,
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "never legal for a capacity query")]
    fn test_deferred_request_query_panics() {
        let config = AmConfig::default();
        let _ = query(
            &config,
            Direction::Request,
            Category::Medium,
            false,
            &LcOpt::Defer,
            SendFlags::empty(),
            0,
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "only available for requests")]
    fn test_group_reply_query_panics() {
        let config = AmConfig::default();
        let _ = query(
            &config,
            Direction::Reply,
            Category::Long,
            false,
            &LcOpt::Group,
            SendFlags::empty(),
            0,
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "limit is 16")]
    fn test_query_arg_count_checked() {
        let config = AmConfig::default();
        let _ = query(
            &config,
            Direction::Request,
            Category::Medium,
            false,
            &LcOpt::Now,
            SendFlags::empty(),
            17,
        );
    }
}
