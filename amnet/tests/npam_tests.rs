//! Integration tests for the negotiated-payload (prepare/commit) path.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use amnet::{
    AmConfig, Args, Cluster, EntryFlags, Error, HandlerEntry, LcOpt, SendFlags, Token,
};

// =============================================================================
// Request Prepare/Commit
// =============================================================================

const NP_SINK: u8 = 180;
static NP_BYTES: Mutex<Vec<u8>> = Mutex::new(Vec::new());
static NP_ARG_OK: AtomicBool = AtomicBool::new(false);

fn np_sink(_token: &mut Token<'_>, payload: &[u8], args: &Args) {
    NP_BYTES
        .lock()
        .expect("bytes lock")
        .extend_from_slice(payload);
    NP_ARG_OK.store(args[0] == 9, Ordering::SeqCst);
}

#[test]
fn test_prepared_medium_roundtrip() {
    let (_cluster, ep0, ep1) = common::net_pair();
    ep1.register_handlers(&mut [HandlerEntry::new(
        NP_SINK,
        np_sink,
        EntryFlags::REQUEST | EntryFlags::MEDIUM,
        1,
    )])
    .expect("register");

    let msg = b"prepared bytes";
    let mut sd = ep0
        .prepare_request_medium(1, None, msg.len(), msg.len(), LcOpt::Now, SendFlags::empty(), 1)
        .expect("prepare");
    assert_eq!(sd.size(), msg.len());
    assert!(!sd.uses_client_buffer());
    sd.payload_mut()[..msg.len()].copy_from_slice(msg);
    ep0.commit_request_medium(sd, NP_SINK, msg.len(), &Args::new(&[9]));

    assert_eq!(ep1.poll(), 1);
    assert_eq!(NP_BYTES.lock().expect("bytes lock").as_slice(), msg);
    assert!(NP_ARG_OK.load(Ordering::SeqCst));
}

const NP_CLIENT: u8 = 181;
static NP_CLIENT_LEN: AtomicUsize = AtomicUsize::new(0);

fn np_client_sink(_token: &mut Token<'_>, payload: &[u8], _args: &Args) {
    let in_order = payload.iter().enumerate().all(|(i, &b)| b == i as u8);
    NP_CLIENT_LEN.store(
        if in_order { payload.len() } else { usize::MAX },
        Ordering::SeqCst,
    );
}

#[test]
fn test_prepared_send_from_client_buffer() {
    let (_cluster, ep0, ep1) = common::net_pair();
    ep1.register_handlers(&mut [HandlerEntry::new(
        NP_CLIENT,
        np_client_sink,
        EntryFlags::REQUEST | EntryFlags::MEDIUM,
        0,
    )])
    .expect("register");

    // The payload already sits in a caller buffer; no staging copy.
    let buffer: Vec<u8> = (0..64).map(|i| i as u8).collect();
    let sd = ep0
        .prepare_request_medium(
            1,
            Some(&buffer),
            buffer.len(),
            buffer.len(),
            LcOpt::Now,
            SendFlags::empty(),
            0,
        )
        .expect("prepare");
    assert!(sd.uses_client_buffer());
    ep0.commit_request_medium(sd, NP_CLIENT, buffer.len(), &Args::empty());

    assert_eq!(ep1.poll(), 1);
    assert_eq!(NP_CLIENT_LEN.load(Ordering::SeqCst), 64);
}

const NP_VOID: u8 = 182;

fn np_void(_token: &mut Token<'_>, _payload: &[u8], _args: &Args) {}

#[test]
fn test_negotiated_size_caps_at_path_limit() {
    let (_cluster, ep0, ep1) = common::net_pair();
    ep1.register_handlers(&mut [HandlerEntry::new(
        NP_VOID,
        np_void,
        EntryFlags::REQUEST | EntryFlags::MEDIUM,
        0,
    )])
    .expect("register");

    // Asking for more than the path allows negotiates down to the limit.
    let sd = ep0
        .prepare_request_medium(1, None, 0, 1 << 20, LcOpt::Now, SendFlags::empty(), 0)
        .expect("prepare");
    assert_eq!(sd.size(), AmConfig::default().max_medium);
    ep0.commit_request_medium(sd, NP_VOID, 0, &Args::empty());
    assert_eq!(ep1.poll(), 1);
}

#[test]
fn test_least_flags_permit_undercutting_the_bound() {
    let (_cluster, ep0, ep1) = common::net_pair();
    ep1.register_handlers(&mut [HandlerEntry::new(
        NP_VOID,
        np_void,
        EntryFlags::REQUEST | EntryFlags::MEDIUM,
        0,
    )])
    .expect("register");

    // least exceeds the path limit; the flag says the caller accepts
    // whatever the path can give.
    let sd = ep0
        .prepare_request_medium(
            1,
            None,
            8192,
            1 << 20,
            LcOpt::Now,
            SendFlags::LEAST_CLIENT,
            0,
        )
        .expect("prepare");
    assert_eq!(sd.size(), AmConfig::default().max_medium);
    ep0.commit_request_medium(sd, NP_VOID, 0, &Args::empty());
    assert_eq!(ep1.poll(), 1);
}

#[test]
fn test_capacity_queries_follow_topology() {
    let config = AmConfig::default();

    let (_cluster, ep0, _ep1) = common::net_pair();
    assert_eq!(
        ep0.max_request_medium(1, &LcOpt::Now, SendFlags::empty(), 0),
        config.max_medium
    );
    assert_eq!(
        ep0.max_reply_medium(1, &LcOpt::Now, SendFlags::empty(), 0),
        config.max_medium
    );
    assert_eq!(ep0.lub_medium(), config.max_medium);
    assert_eq!(ep0.lub_long(), config.max_long);

    let (_cluster, nb0, _nb1) = common::nbrhd_pair();
    assert_eq!(
        nb0.max_request_medium(1, &LcOpt::Now, SendFlags::empty(), 0),
        config.nbrhd_max_medium
    );
    assert_eq!(
        nb0.max_request_long(1, &LcOpt::Now, SendFlags::empty(), 0),
        config.nbrhd_max_long
    );
    assert_eq!(
        nb0.max_reply_long(1, &LcOpt::Now, SendFlags::empty(), 0),
        config.nbrhd_max_long
    );
}

const NP_STALLED: u8 = 183;

#[test]
fn test_immediate_prepare_reports_no_capacity() {
    let (_cluster, ep0, _ep1) =
        common::net_pair_with(AmConfig::new().with_queue_depth(1));
    ep0.request_short(1, NP_STALLED, &Args::empty(), SendFlags::IMMEDIATE)
        .expect("fill the queue");

    let err = ep0
        .prepare_request_medium(1, None, 0, 64, LcOpt::Now, SendFlags::IMMEDIATE, 0)
        .expect_err("no capacity");
    assert!(matches!(err, Error::Resource(_)));
}

const NP_MODES: u8 = 188;
static NP_MODES_COUNT: AtomicUsize = AtomicUsize::new(0);

fn np_modes_sink(_token: &mut Token<'_>, _payload: &[u8], _args: &Args) {
    NP_MODES_COUNT.fetch_add(1, Ordering::SeqCst);
}

// Deferred and group completion stay legal for request prepares; only
// replies and capacity queries reject them.
#[test]
fn test_deferred_and_group_request_completions_deliver() {
    let (_cluster, ep0, ep1) = common::net_pair();
    ep1.register_handlers(&mut [HandlerEntry::new(
        NP_MODES,
        np_modes_sink,
        EntryFlags::REQUEST | EntryFlags::MEDIUM,
        0,
    )])
    .expect("register");

    let sd = ep0
        .prepare_request_medium(1, None, 0, 32, LcOpt::Defer, SendFlags::empty(), 0)
        .expect("deferred prepare");
    ep0.commit_request_medium(sd, NP_MODES, 0, &Args::empty());

    let sd = ep0
        .prepare_request_medium(1, None, 0, 32, LcOpt::Group, SendFlags::empty(), 0)
        .expect("group prepare");
    ep0.commit_request_medium(sd, NP_MODES, 0, &Args::empty());

    assert_eq!(ep1.poll(), 2);
    assert_eq!(NP_MODES_COUNT.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Reply Prepare/Commit
// =============================================================================

const NPR_REQUEST: u8 = 184;
const NPR_SINK: u8 = 185;
static NPR_BYTES: Mutex<Vec<u8>> = Mutex::new(Vec::new());
static NPR_ARG_OK: AtomicBool = AtomicBool::new(false);

fn npr_request(token: &mut Token<'_>, _payload: &[u8], _args: &Args) {
    let msg = b"negotiated answer";
    let mut sd = token
        .prepare_reply_medium(None, msg.len(), msg.len(), LcOpt::Now, SendFlags::empty(), 1)
        .expect("prepare reply");
    sd.payload_mut()[..msg.len()].copy_from_slice(msg);
    token.commit_reply_medium(sd, NPR_SINK, msg.len(), &Args::new(&[5]));
}

fn npr_sink(_token: &mut Token<'_>, payload: &[u8], args: &Args) {
    NPR_BYTES
        .lock()
        .expect("bytes lock")
        .extend_from_slice(payload);
    NPR_ARG_OK.store(args[0] == 5, Ordering::SeqCst);
}

#[test]
fn test_prepared_reply_roundtrip() {
    let (_cluster, ep0, ep1) = common::net_pair();
    ep0.register_handlers(&mut [HandlerEntry::new(
        NPR_SINK,
        npr_sink,
        EntryFlags::REPLY | EntryFlags::MEDIUM,
        1,
    )])
    .expect("register sink");
    ep1.register_handlers(&mut [HandlerEntry::new(
        NPR_REQUEST,
        npr_request,
        EntryFlags::REQUEST | EntryFlags::SHORT,
        0,
    )])
    .expect("register request");

    ep0.request_short(1, NPR_REQUEST, &Args::empty(), SendFlags::empty())
        .expect("send");
    assert_eq!(ep1.poll(), 1);
    assert_eq!(ep0.poll(), 1);
    assert_eq!(
        NPR_BYTES.lock().expect("bytes lock").as_slice(),
        b"negotiated answer"
    );
    assert!(NPR_ARG_OK.load(Ordering::SeqCst));
}

// =============================================================================
// Long Prepare/Commit
// =============================================================================

const NPL_SINK: u8 = 186;
static NPL_OK: AtomicBool = AtomicBool::new(false);

fn npl_sink(_token: &mut Token<'_>, payload: &[u8], _args: &Args) {
    let content_ok = payload.len() == 128
        && payload.iter().enumerate().all(|(i, &b)| b == (0x40 + i) as u8);
    NPL_OK.store(content_ok, Ordering::SeqCst);
}

#[test]
fn test_prepared_long_lands_at_fixed_address() {
    let (_cluster, ep0, ep1) = common::net_pair();
    ep1.register_handlers(&mut [HandlerEntry::new(
        NPL_SINK,
        npl_sink,
        EntryFlags::REQUEST | EntryFlags::LONG,
        0,
    )])
    .expect("register");

    let mut sd = ep0
        .prepare_request_long(
            1,
            None,
            128,
            128,
            Some(192),
            LcOpt::Now,
            SendFlags::empty(),
            0,
        )
        .expect("prepare");
    for (i, byte) in sd.payload_mut()[..128].iter_mut().enumerate() {
        *byte = (0x40 + i) as u8;
    }
    ep0.commit_request_long(sd, NPL_SINK, 128, 192, &Args::empty());

    assert_eq!(ep1.poll(), 1);
    assert!(NPL_OK.load(Ordering::SeqCst));
}

// =============================================================================
// Self Delivery and Injection Window
// =============================================================================

const NP_SELF: u8 = 187;
static NP_SELF_LEN: AtomicUsize = AtomicUsize::new(0);

fn np_self_sink(_token: &mut Token<'_>, payload: &[u8], _args: &Args) {
    NP_SELF_LEN.store(payload.len(), Ordering::SeqCst);
}

#[test]
fn test_commit_to_self_delivers_in_band() {
    let cluster = Cluster::builder().ranks(1).build().expect("cluster");
    let ep = cluster.create_endpoint(0).expect("endpoint");
    ep.register_handlers(&mut [HandlerEntry::new(
        NP_SELF,
        np_self_sink,
        EntryFlags::REQUEST | EntryFlags::MEDIUM,
        0,
    )])
    .expect("register");

    let mut sd = ep
        .prepare_request_medium(0, None, 16, 16, LcOpt::Now, SendFlags::empty(), 0)
        .expect("prepare");
    sd.payload_mut().fill(0xee);
    ep.commit_request_medium(sd, NP_SELF, 16, &Args::empty());
    // The commit closed the injection window before sending, so the
    // handler already ran inside the commit call.
    assert_eq!(NP_SELF_LEN.load(Ordering::SeqCst), 16);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "between a request prepare and its commit")]
fn test_poll_inside_injection_window_panics() {
    let (_cluster, ep0, _ep1) = common::net_pair();
    let _sd = ep0
        .prepare_request_medium(1, None, 0, 64, LcOpt::Now, SendFlags::empty(), 0)
        .expect("prepare");
    ep0.poll();
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "between a request prepare and its commit")]
fn test_nested_prepare_panics() {
    let (_cluster, ep0, _ep1) = common::net_pair();
    let _first = ep0
        .prepare_request_medium(1, None, 0, 64, LcOpt::Now, SendFlags::empty(), 0)
        .expect("prepare");
    let _second =
        ep0.prepare_request_medium(1, None, 0, 64, LcOpt::Now, SendFlags::empty(), 0);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "request commit failed")]
fn test_commit_to_dropped_peer_reports() {
    let (_cluster, ep0, ep1) = common::net_pair();
    let sd = ep0
        .prepare_request_medium(1, None, 0, 8, LcOpt::Now, SendFlags::empty(), 0)
        .expect("prepare");
    drop(ep1);
    ep0.commit_request_medium(sd, NP_VOID, 0, &Args::empty());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "arguments but prepare declared")]
fn test_commit_arity_must_match_prepare() {
    let (_cluster, ep0, _ep1) = common::net_pair();
    let sd = ep0
        .prepare_request_medium(1, None, 0, 8, LcOpt::Now, SendFlags::empty(), 2)
        .expect("prepare");
    ep0.commit_request_medium(sd, NP_VOID, 0, &Args::new(&[1]));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "were negotiated")]
fn test_commit_cannot_exceed_negotiated_size() {
    let (_cluster, ep0, _ep1) = common::net_pair();
    let sd = ep0
        .prepare_request_medium(1, None, 0, 8, LcOpt::Now, SendFlags::empty(), 0)
        .expect("prepare");
    ep0.commit_request_medium(sd, NP_VOID, 16, &Args::empty());
}
