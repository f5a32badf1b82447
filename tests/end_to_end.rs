//! Full share-flow tests against stubbed upstream chains and a stubbed
//! proof-of-work hash, exercising template refresh, share validation, and
//! dual-chain submission without any real node or real hashing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use rxd_stratum::consensus::hash::{sha256d, PowHash};
use rxd_stratum::consensus::merkle::merkle_root;
use rxd_stratum::consensus::target::Target;
use rxd_stratum::error::StratumError;
use rxd_stratum::events::EventBus;
use rxd_stratum::job::updater::AuxUpstream;
use rxd_stratum::job::{JobManager, PayoutState, TemplateUpdater};
use rxd_stratum::config::MiningConfig;
use rxd_stratum::rpc::types::{AuxBlock, BlockTemplate, TemplateTx};
use rxd_stratum::rpc::{ChainClient, SubmitOutcome};
use rxd_stratum::session::hashrate::HashrateTracker;
use rxd_stratum::session::share::{ShareProcessor, ShareSubmit};
use rxd_stratum::submission::{SubmissionLog, Submitter};

/// Nonce the stub hasher treats as a winner for any header.
const MAGIC_NONCE: u32 = 0x4242_4242;

/// Stub proof-of-work: the magic nonce hashes to the integer 1, anything
/// else to the maximum digest.
struct StubPow;

impl PowHash for StubPow {
    fn pow_hash(&self, header: &[u8]) -> [u8; 32] {
        let nonce = u32::from_le_bytes(header[76..80].try_into().expect("80-byte header"));
        if nonce == MAGIC_NONCE {
            let mut digest = [0u8; 32];
            digest[0] = 0x01;
            digest
        } else {
            [0xff; 32]
        }
    }
}

#[derive(Default)]
struct StubCalls {
    blocks: Vec<String>,
    auxpows: Vec<(String, String)>,
}

struct StubChain {
    name: &'static str,
    template: Mutex<Option<BlockTemplate>>,
    aux_block: Mutex<Option<AuxBlock>>,
    calls: Mutex<StubCalls>,
    submit_delay: Option<Duration>,
}

impl StubChain {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            template: Mutex::new(None),
            aux_block: Mutex::new(None),
            calls: Mutex::new(StubCalls::default()),
            submit_delay: None,
        })
    }

    fn with_delay(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            template: Mutex::new(None),
            aux_block: Mutex::new(None),
            calls: Mutex::new(StubCalls::default()),
            submit_delay: Some(delay),
        })
    }

    fn block_count(&self) -> usize {
        self.calls.lock().blocks.len()
    }

    fn auxpow_count(&self) -> usize {
        self.calls.lock().auxpows.len()
    }
}

#[async_trait]
impl ChainClient for StubChain {
    fn chain_name(&self) -> &str {
        self.name
    }

    async fn fetch_template(&self) -> rxd_stratum::Result<BlockTemplate> {
        self.template
            .lock()
            .clone()
            .ok_or_else(|| StratumError::UpstreamUnavailable {
                chain: self.name.into(),
                message: "no template".into(),
            })
    }

    async fn submit_block(&self, block_hex: &str) -> rxd_stratum::Result<SubmitOutcome> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().blocks.push(block_hex.to_string());
        Ok(SubmitOutcome::Accepted)
    }

    async fn fetch_aux_block(&self, _payout_address: &str) -> rxd_stratum::Result<AuxBlock> {
        self.aux_block
            .lock()
            .clone()
            .ok_or_else(|| StratumError::UpstreamUnavailable {
                chain: self.name.into(),
                message: "no aux block".into(),
            })
    }

    async fn submit_aux_block(
        &self,
        aux_hash_hex: &str,
        auxpow_hex: &str,
    ) -> rxd_stratum::Result<SubmitOutcome> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .auxpows
            .push((aux_hash_hex.to_string(), auxpow_hex.to_string()));
        Ok(SubmitOutcome::Accepted)
    }
}

fn t1_txid() -> [u8; 32] {
    sha256d(b"T1")
}

fn two_tx_template() -> BlockTemplate {
    BlockTemplate {
        height: 1000,
        version: 0x2000_0000,
        prev_hash_be: [0x0a; 32],
        bits: 0x1d00ffff,
        target: Target::from_be_hex(&format!("00000fff{}", "f".repeat(56))).unwrap(),
        coinbase_value: 50_000_000_000,
        cur_time: 1_700_000_000,
        min_time: 1_700_000_000,
        transactions: vec![TemplateTx {
            raw: vec![0xbe, 0xef],
            txid_le: t1_txid(),
        }],
        extra_outputs: vec![],
    }
}

fn aux_block() -> AuxBlock {
    AuxBlock {
        hash_be: [0x77; 32],
        chain_id: 7,
        bits: 0x1e0fffff,
        target: Target::from_be_hex(&format!("0000ffff{}", "f".repeat(56))).unwrap(),
        height: 555,
    }
}

struct Rig {
    primary: Arc<StubChain>,
    aux: Arc<StubChain>,
    jobs: Arc<JobManager>,
    updater: Arc<TemplateUpdater>,
    processor: ShareProcessor,
    _tmp: tempfile::TempDir,
}

fn rig(primary: Arc<StubChain>, aux: Arc<StubChain>, submit_timeout: Duration) -> Rig {
    *primary.template.lock() = Some(two_tx_template());
    *aux.aux_block.lock() = Some(aux_block());

    let jobs = Arc::new(JobManager::new(8));
    let payout = Arc::new(PayoutState::new(Some([0xab; 20])));
    let mining = MiningConfig::default();

    let updater = Arc::new(TemplateUpdater::new(
        primary.clone(),
        Some(AuxUpstream {
            client: aux.clone(),
            payout_address: "aux-payout".into(),
        }),
        jobs.clone(),
        payout,
        mining,
    ));

    let tmp = tempfile::tempdir().unwrap();
    let events = EventBus::default();
    let submitter = Submitter::new(
        primary.clone(),
        Some(aux.clone()),
        events.clone(),
        SubmissionLog::new(tmp.path()),
        submit_timeout,
    );

    let processor = ShareProcessor::new(
        jobs.clone(),
        submitter,
        None,
        Arc::new(HashrateTracker::new()),
        events,
        Arc::new(StubPow),
    );

    Rig {
        primary,
        aux,
        jobs,
        updater,
        processor,
        _tmp: tmp,
    }
}

fn winning_share(job_id: &str, ntime: u32) -> ShareSubmit {
    ShareSubmit {
        worker: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa.rig1".into(),
        job_id: job_id.into(),
        extranonce2: [0, 0, 0, 2],
        ntime,
        nonce: MAGIC_NONCE,
    }
}

#[tokio::test]
async fn winning_share_submits_to_both_chains() {
    let rig = rig(
        StubChain::new("RXD"),
        StubChain::new("AUX"),
        Duration::from_secs(5),
    );

    rig.updater.refresh(false).await.unwrap();
    let job = rig.jobs.current().expect("job published");
    assert_eq!(job.merkle_branch, vec![t1_txid()]);
    assert!(job.aux.is_some());

    let share = winning_share(&job.id, job.time);
    let outcome = rig.processor.process(1, 1.0, &share).expect("share accepted");
    assert!(outcome.primary_block);
    assert!(outcome.aux_block);
    assert_eq!(outcome.submissions.len(), 2);

    for handle in outcome.submissions {
        handle.await.unwrap();
    }

    // Exactly one block submission whose header commits to
    // merkle(coinbase_id, [T1]).
    assert_eq!(rig.primary.block_count(), 1);
    let block_hex = rig.primary.calls.lock().blocks[0].clone();
    let block = hex::decode(&block_hex).unwrap();

    let mut extranonce = [0u8; 8];
    extranonce[..4].copy_from_slice(&1u32.to_be_bytes());
    extranonce[4..].copy_from_slice(&share.extranonce2);
    let coinbase = job.coinbase.assemble(&extranonce).unwrap();
    let expected_root = merkle_root(&[sha256d(&coinbase), t1_txid()]);

    assert_eq!(&block[36..68], &expected_root);
    assert_eq!(block[80], 2, "coinbase plus one external transaction");

    // Exactly one auxpow submission whose proof embeds the same coinbase
    // bytes used in the submitted block, against the committed aux hash.
    assert_eq!(rig.aux.auxpow_count(), 1);
    let (aux_hash, proof_hex) = rig.aux.calls.lock().auxpows[0].clone();
    assert_eq!(aux_hash, hex::encode([0x77u8; 32]));
    assert!(proof_hex.starts_with(&hex::encode(&coinbase)));
    // The solved parent header terminates the proof.
    assert!(proof_hex.ends_with(&hex::encode(&block[..80])));
}

#[tokio::test]
async fn duplicate_share_is_rejected_without_double_submission() {
    let rig = rig(
        StubChain::new("RXD"),
        StubChain::new("AUX"),
        Duration::from_secs(5),
    );

    rig.updater.refresh(false).await.unwrap();
    let job = rig.jobs.current().unwrap();
    let share = winning_share(&job.id, job.time);

    let outcome = rig.processor.process(1, 1.0, &share).unwrap();
    for handle in outcome.submissions {
        handle.await.unwrap();
    }

    match rig.processor.process(1, 1.0, &share) {
        Err(StratumError::DuplicateShare { .. }) => {}
        other => panic!("expected duplicate rejection, got {other:?}"),
    }

    assert_eq!(rig.primary.block_count(), 1);
    assert_eq!(rig.aux.auxpow_count(), 1);
}

#[tokio::test]
async fn stale_job_is_classified_not_silently_dropped() {
    let rig = rig(
        StubChain::new("RXD"),
        StubChain::new("AUX"),
        Duration::from_secs(5),
    );
    rig.updater.refresh(false).await.unwrap();

    let share = winning_share("deadbeef", 1_700_000_000);
    match rig.processor.process(1, 1.0, &share) {
        Err(StratumError::StaleJob { job_id }) => assert_eq!(job_id, "deadbeef"),
        other => panic!("expected stale-job rejection, got {other:?}"),
    }
    assert_eq!(rig.primary.block_count(), 0);
}

#[tokio::test]
async fn slow_primary_never_delays_aux_submission() {
    // The primary daemon stalls for two seconds; the aux submission must
    // land within its own budget regardless.
    let rig = rig(
        StubChain::with_delay("RXD", Duration::from_secs(2)),
        StubChain::new("AUX"),
        Duration::from_secs(5),
    );

    rig.updater.refresh(false).await.unwrap();
    let job = rig.jobs.current().unwrap();
    let share = winning_share(&job.id, job.time);

    let started = Instant::now();
    let outcome = rig.processor.process(1, 1.0, &share).unwrap();
    assert_eq!(outcome.submissions.len(), 2);

    // Wait only for the aux task (spawn order: primary first, aux second).
    let mut submissions = outcome.submissions;
    let aux_task = submissions.pop().unwrap();
    aux_task.await.unwrap();

    assert_eq!(rig.aux.auxpow_count(), 1);
    assert_eq!(rig.primary.block_count(), 0, "primary still stalled");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "aux submission waited on the slow primary"
    );

    // The primary eventually completes on its own.
    submissions.pop().unwrap().await.unwrap();
    assert_eq!(rig.primary.block_count(), 1);
}

#[tokio::test]
async fn low_difficulty_share_is_rejected() {
    let rig = rig(
        StubChain::new("RXD"),
        StubChain::new("AUX"),
        Duration::from_secs(5),
    );
    rig.updater.refresh(false).await.unwrap();
    let job = rig.jobs.current().unwrap();

    let mut share = winning_share(&job.id, job.time);
    share.nonce = 0x1111_1111; // hashes to the maximum digest

    match rig.processor.process(1, 1.0, &share) {
        Err(StratumError::LowDifficulty { .. }) => {}
        other => panic!("expected low-difficulty rejection, got {other:?}"),
    }
    assert_eq!(rig.primary.block_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn issued_jobs_are_immutable_under_concurrent_refresh() {
    // N readers race one writer; a job handed out must never change, and
    // every observed snapshot must be internally consistent.
    let jobs = Arc::new(JobManager::new(4));

    let make_job = |tag: u64| rxd_stratum::job::Job {
        id: format!("job-{tag}"),
        height: tag,
        version: tag as i32,
        prev_hash_le: [tag as u8; 32],
        coinbase: rxd_stratum::consensus::coinbase::CoinbaseParts {
            prefix: vec![tag as u8],
            suffix: vec![tag as u8],
        },
        merkle_branch: vec![],
        bits: 0x1d00ffff,
        time: tag as u32,
        clean: false,
        primary_target: Target::from_compact(0x1d00ffff).unwrap(),
        aux: None,
        network_difficulty: 1.0,
        external_txs: vec![],
    };

    let issued = jobs.publish(make_job(1));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let jobs = jobs.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..2000 {
                if let Some(job) = jobs.current() {
                    // Internally consistent snapshot, never torn.
                    let tag = job.height;
                    assert_eq!(job.id, format!("job-{tag}"));
                    assert_eq!(job.version, tag as i32);
                    assert_eq!(job.prev_hash_le, [tag as u8; 32]);
                    assert_eq!(job.time, tag as u32);
                }
            }
        }));
    }

    let writer = {
        let jobs = jobs.clone();
        tokio::spawn(async move {
            for tag in 2..200u64 {
                jobs.publish(make_job(tag));
                tokio::task::yield_now().await;
            }
        })
    };

    for reader in readers {
        reader.await.unwrap();
    }
    writer.await.unwrap();

    // The early snapshot is untouched by all later publishes.
    assert_eq!(issued.id, "job-1");
    assert_eq!(issued.height, 1);
    assert_eq!(issued.coinbase.prefix, vec![1]);
}
