use super::{AdaptivePolicy, ClusterError, ClusterManager, SlurmCluster, SlurmEnv};
use crate::sampling::{Chunk, ChunkExecutor, ChunkPlan, ChunkSampler, SamplingError};
use std::{collections::BTreeMap, ffi::OsStr, fs, path::PathBuf, time::Duration};

/// stand-in for `srun`, answers every step as if all pairs hit the circle
const ECHO_STEP: &str = r#"
while [ $# -gt 0 ]; do
    case "$1" in
        --start) start=$2; shift ;;
        --pairs) pairs=$2; shift ;;
    esac
    shift
done
printf 'start: %s\npairs: %s\ninside: %s\n' "$start" "$pairs" "$pairs"
"#;

fn script(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("montepi-slurm-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();

    path
}

/// cluster running `sh <script>` instead of `srun`
fn scripted(name: &str, content: &str, timeout: Duration) -> SlurmCluster {
    let script = script(name, content);

    SlurmCluster::new(
        Some(allocation(4)),
        PathBuf::from("/bin/sh"),
        vec![script.to_string_lossy().into_owned()],
        PathBuf::from("montepi"),
        timeout,
        2,
    )
    .unwrap()
}

fn allocation(ntasks: usize) -> SlurmEnv {
    SlurmEnv {
        job_id: String::from("4242"),
        ntasks,
        node_list: String::from("node[01-02]"),
    }
}

#[test]
pub fn detects_allocation_from_environment() {
    let vars = BTreeMap::from([
        ("SLURM_JOB_ID", "1234"),
        ("SLURM_TASKS_PER_NODE", "8(x2),4"),
        ("SLURM_NODELIST", "c[1-3]"),
    ]);
    let env = SlurmEnv::from_lookup(|key| vars.get(key).map(|value| value.to_string())).unwrap();

    assert_eq!(env.job_id, "1234");
    assert_eq!(env.ntasks, 8);
    assert_eq!(env.node_list, "c[1-3]");

    let vars = BTreeMap::from([("SLURM_JOB_ID", "1"), ("SLURM_NTASKS", "16")]);
    let env = SlurmEnv::from_lookup(|key| vars.get(key).map(|value| value.to_string())).unwrap();
    assert_eq!(env.ntasks, 16);
    assert_eq!(env.node_list, "localhost");

    assert_eq!(SlurmEnv::from_lookup(|_| None), None);
}

#[test]
pub fn step_command_runs_chunk_subcommand() {
    let cluster = SlurmCluster::new(
        None,
        PathBuf::from("srun"),
        vec![String::from("--exclusive")],
        PathBuf::from("/opt/montepi"),
        Duration::from_secs(60),
        2,
    )
    .unwrap();
    let chunk = Chunk {
        index: 3,
        start: 300,
        pairs: 100,
    };
    let command = cluster.step_command(&chunk, &ChunkSampler::new(77));

    assert_eq!(command.get_program(), OsStr::new("srun"));
    assert_eq!(
        command.get_args().collect::<Vec<_>>(),
        [
            "--exclusive",
            "--ntasks=1",
            "--nodes=1",
            "--job-name=montepi-chunk-3",
            "/opt/montepi",
            "chunk",
            "--seed",
            "77",
            "--start",
            "300",
            "--pairs",
            "100",
        ]
        .map(OsStr::new)
    );
}

#[test]
pub fn resize_is_bounded_by_allocation() {
    let cluster = SlurmCluster::new(
        Some(allocation(4)),
        PathBuf::from("srun"),
        Vec::new(),
        PathBuf::from("montepi"),
        Duration::from_secs(60),
        2,
    )
    .unwrap();

    cluster.resize(4).unwrap();
    assert_eq!(cluster.current_worker_count(), 4);
    assert!(matches!(
        cluster.resize(5),
        Err(ClusterError::ResourceUnavailable(_))
    ));
    assert!(matches!(
        cluster.resize(0),
        Err(ClusterError::InvalidWorkerCount(0))
    ));
    assert_eq!(cluster.current_worker_count(), 4);
}

#[test]
pub fn autoscale_maximum_is_limited_to_allocation() {
    let cluster = SlurmCluster::new(
        Some(allocation(4)),
        PathBuf::from("srun"),
        Vec::new(),
        PathBuf::from("montepi"),
        Duration::from_secs(60),
        1,
    )
    .unwrap();

    let handle = cluster
        .enable_autoscale(AdaptivePolicy::new(1, 32, Duration::from_secs(5), 2.0))
        .unwrap();

    assert_eq!(handle.policy().maximum, 4);
}

#[test]
pub fn oversized_initial_pool_is_rejected() {
    assert!(matches!(
        SlurmCluster::new(
            Some(allocation(2)),
            PathBuf::from("srun"),
            Vec::new(),
            PathBuf::from("montepi"),
            Duration::from_secs(60),
            3,
        ),
        Err(ClusterError::ResourceUnavailable(_))
    ));
}

#[test]
pub fn job_step_outputs_are_reduced() {
    let cluster = scripted("echo.sh", ECHO_STEP, Duration::from_secs(30));
    let plan = ChunkPlan::from_pairs(1_050, 100);

    assert_eq!(cluster.execute(&plan, &ChunkSampler::new(1)).unwrap(), 1_050);
}

#[test]
pub fn failed_job_step_fails_execution() {
    let cluster = scripted("fail.sh", "echo 'node failure' >&2\nexit 3\n", Duration::from_secs(30));

    assert!(matches!(
        cluster.execute(&ChunkPlan::from_pairs(300, 100), &ChunkSampler::new(1)),
        Err(SamplingError::ResourceUnavailable(_))
    ));
}

#[test]
pub fn mismatching_job_step_output_is_rejected() {
    let cluster = scripted(
        "wrong.sh",
        "printf 'start: 0\\npairs: 1\\ninside: 1\\n'\n",
        Duration::from_secs(30),
    );

    assert!(matches!(
        cluster.execute(&ChunkPlan::from_pairs(300, 100), &ChunkSampler::new(1)),
        Err(SamplingError::ResourceUnavailable(_))
    ));
}

#[test]
pub fn hanging_job_step_times_out() {
    let cluster = scripted("hang.sh", "sleep 10\n", Duration::from_millis(200));

    assert!(matches!(
        cluster.execute(&ChunkPlan::from_pairs(100, 100), &ChunkSampler::new(1)),
        Err(SamplingError::ResourceUnavailable(_))
    ));
}

#[test]
pub fn verbose_job_step_does_not_stall() {
    let content = format!("head -c 204800 /dev/zero >&2\n{ECHO_STEP}");
    let cluster = scripted("verbose.sh", &content, Duration::from_secs(30));

    assert_eq!(
        cluster
            .execute(&ChunkPlan::from_pairs(100, 100), &ChunkSampler::new(1))
            .unwrap(),
        100
    );
}
