mod common;

use std::time::Duration;

use common::*;
use serde_json::{json, Value};
use stratum_proxy::work::codec;

fn getwork() -> Value {
    json!({"id": 1, "method": "getwork", "params": []})
}

/// Fetches work as `user`, solves it and submits it. Returns the pool's answer and the nonce.
async fn mine_getwork(proxy: &RunningProxy, user: &str) -> (Value, u32) {
    let (_, body) = getwork_call(proxy, "/", user, getwork()).await.unwrap();
    let data = body["result"]["data"].as_str().unwrap();
    let mut header = codec::parse_getwork_data(data).unwrap();
    let nonce = grind(&header);
    header[76..].copy_from_slice(&nonce.to_le_bytes());
    let submit = json!({"id": 2, "method": "getwork", "params": [codec::getwork_data_hex(&header)]});
    let (_, body) = getwork_call(proxy, "/", user, submit).await.unwrap();
    (body["result"].clone(), nonce)
}

// A getwork miner fetches work from the proxy, solves it, and the share reaches the pool under
// the miner's own credentials.
#[tokio::test]
async fn getwork_share_reaches_pool() {
    let pool = MockPool::start(notify_params("j1", 0x22, true)).await;
    let proxy = start_proxy(&pool, None).await;

    let (result, nonce) = mine_getwork(&proxy, "alice").await;
    assert_eq!(result, true);

    let submit = pool.next_request("mining.submit").await;
    assert_eq!(submit["params"][0], "alice");
    assert_eq!(submit["params"][1], "j1");
    assert_eq!(submit["params"][4], format!("{nonce:08x}"));
}

// A Stratum miner gets its own extranonce prefix on the proxy's single pool subscription, and its
// share is forwarded with that prefix folded back into extranonce2.
#[tokio::test]
async fn stratum_miner_shares_pool_session() {
    let pool = MockPool::start(notify_params("j1", 0x22, true)).await;
    let proxy = start_proxy(&pool, None).await;

    let mut miner = Miner::connect(proxy.stratum).await;
    miner
        .send(json!({"id": 1, "method": "mining.subscribe", "params": ["test-miner/1.0"]}))
        .await;
    let (subscribed, _) = miner.response(1).await;
    let extranonce1 = subscribed["result"][1].as_str().unwrap().to_string();
    assert!(extranonce1.starts_with(POOL_EXTRANONCE1));
    assert_eq!(extranonce1.len(), POOL_EXTRANONCE1.len() + 2);
    assert_eq!(subscribed["result"][2], POOL_EXTRANONCE2_SIZE - 1);

    miner
        .send(json!({"id": 2, "method": "mining.authorize", "params": ["bob", "x"]}))
        .await;
    let (authorized, pushes) = miner.response(2).await;
    assert_eq!(authorized["result"], true);
    let notify = pushes
        .iter()
        .find(|m| m["method"] == "mining.notify")
        .expect("job pushed after subscribe");
    assert_eq!(notify["params"][0], "j1");
    let ntime_hex = notify["params"][7].as_str().unwrap().to_string();
    let ntime = u32::from_str_radix(&ntime_hex, 16).unwrap();

    let job = job("j1", 0x22, ntime);
    let extranonce2 = [0, 0, 7];
    let root = codec::merkle_root(&job, &hex::decode(&extranonce1).unwrap(), &extranonce2);
    let nonce = grind(&codec::header(&job, &root, ntime, 0));
    miner
        .send(json!({"id": 3, "method": "mining.submit",
            "params": ["bob", "j1", "000007", ntime_hex, format!("{nonce:08x}")]}))
        .await;
    let (submitted, _) = miner.response(3).await;
    assert_eq!(submitted["result"], true);

    let submit = pool.next_request("mining.submit").await;
    assert_eq!(submit["params"][0], "bob");
    let tail = &extranonce1[POOL_EXTRANONCE1.len()..];
    assert_eq!(submit["params"][2], format!("{tail}000007"));
}

// Two long polling miners waiting on an old job are both answered with the new clean job long
// before the long poll timeout.
#[tokio::test]
async fn long_poll_released_by_clean_job() {
    let pool = MockPool::start(notify_params("old", 0x22, true)).await;
    let proxy = std::sync::Arc::new(start_proxy(&pool, None).await);

    let mut polls = vec![];
    for user in ["carol", "dave"] {
        let proxy = proxy.clone();
        polls.push(tokio::spawn(async move {
            getwork_call(&proxy, "/lp", user, json!({})).await.unwrap()
        }));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    pool.notify(notify_params("abc", 0x33, true)).await;

    for poll in polls {
        let (status, body) = tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, 200);
        let header = codec::parse_getwork_data(body["result"]["data"].as_str().unwrap()).unwrap();
        assert_eq!(&header[4..36], &[0x33; 32]);
    }
}

// With a fixed pool account configured, shares from different getwork workers are all
// submitted under that account while each worker still gets its own answer.
#[tokio::test]
async fn fixed_account_submits_for_every_worker() {
    let pool = MockPool::start(notify_params("j1", 0x22, true)).await;
    let proxy = start_proxy(&pool, Some("farm")).await;

    for user in ["rig1", "rig2"] {
        let (result, nonce) = mine_getwork(&proxy, user).await;
        assert_eq!(result, true);
        let submit = pool.next_request("mining.submit").await;
        assert_eq!(submit["params"][0], "farm");
        assert_eq!(submit["params"][4], format!("{nonce:08x}"));
    }
}
