//! 디렉토리 tailer
//!
//! 감시 디렉토리 바로 아래의 일반 파일을 주기적으로 스캔하여 추가된 라인을 수집합니다.
//! `tail -F`와 유사하게 동작합니다.
//!
//! # 로테이션 감지
//! 다음 중 하나면 파일을 처음(offset 0)부터 다시 읽습니다.
//! - 같은 경로의 파일 identity(dev, inode) 변경
//! - 파일 크기가 읽은 위치보다 작아짐 (truncation)
//! - 파일 앞부분(최대 64바이트)이 지난번과 다름 (스캔 간격 안에 truncate 후 다시 커짐)
//!
//! 다른 경로로 이름이 바뀐 파일은 identity로 추적하여 이어서 읽습니다.
//! 경계 상황에서는 중복 전송을 허용하고 유실은 허용하지 않습니다.

use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use syslog_forwarder_core::metrics as m;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CollectorStatus;
use crate::error::ForwardError;
use crate::event::LogEvent;

/// 파일 교체 감지에 쓰는 앞부분 길이
const HEAD_LEN: usize = 64;

/// tailer 설정
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// tailer 활성화 여부
    pub enabled: bool,
    /// 감시 디렉토리
    pub watch_dir: PathBuf,
    /// 스캔 주기
    pub poll_interval: Duration,
    /// 한 번에 읽는 바이트 수
    pub read_chunk_size: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_dir: PathBuf::from("/var/vcap/sys/log/syslog_forwarder"),
            poll_interval: Duration::from_secs(1),
            read_chunk_size: 8192,
        }
    }
}

/// 파일 identity (Unix: device + inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &Metadata) -> Option<Self> {
        None
    }
}

/// 파일별 추적 상태
#[derive(Debug)]
struct TailState {
    /// 현재 경로
    path: PathBuf,
    /// 마지막으로 본 identity
    identity: Option<FileIdentity>,
    /// 다음에 읽을 위치
    offset: u64,
    /// 아직 개행이 오지 않은 라인 조각
    pending: Vec<u8>,
    /// 파일 앞부분 (최대 HEAD_LEN 바이트)
    head: Vec<u8>,
    /// 마지막으로 스캔에서 발견된 시각
    last_seen: Instant,
}

impl TailState {
    fn new(path: PathBuf, identity: Option<FileIdentity>) -> Self {
        Self {
            path,
            identity,
            offset: 0,
            pending: Vec::new(),
            head: Vec::new(),
            last_seen: Instant::now(),
        }
    }

    /// 읽은 조각을 pending 뒤에 붙이고 완성된 라인을 꺼냅니다.
    ///
    /// 끝의 `\r`은 제거하고 빈 라인은 건너뜁니다.
    fn take_lines(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut lines = Vec::new();
        let mut start = 0;

        for (i, _) in chunk.iter().enumerate().filter(|(_, b)| **b == b'\n') {
            let mut line = std::mem::take(&mut self.pending);
            line.extend_from_slice(&chunk[start..i]);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(Bytes::from(line));
            }
            start = i + 1;
        }

        self.pending.extend_from_slice(&chunk[start..]);
        lines
    }

    /// 처음부터 다시 읽도록 상태를 초기화합니다. 남은 조각을 반환합니다.
    fn reset(&mut self, identity: Option<FileIdentity>) -> Option<Bytes> {
        self.offset = 0;
        self.head.clear();
        self.identity = identity;
        let pending = std::mem::take(&mut self.pending);
        (!pending.is_empty()).then(|| Bytes::from(pending))
    }
}

/// 디렉토리 tailer
///
/// 읽은 라인은 [`LogEvent::tailed`]로 감싸 정규화 단계로 보냅니다.
/// `TailState`는 이 구조체만 소유합니다.
pub struct FileTailer {
    /// tailer 설정
    config: TailerConfig,
    /// 정규화 단계 입력 채널
    tx: mpsc::Sender<LogEvent>,
    /// 종료 신호
    cancel: CancellationToken,
    /// 경로별 추적 상태
    states: HashMap<PathBuf, TailState>,
    /// 현재 상태
    status: CollectorStatus,
    /// 읽기 실패 횟수
    read_errors: u64,
    /// 감지한 로테이션 횟수
    rotations: u64,
}

impl FileTailer {
    /// 새 tailer를 생성합니다.
    pub fn new(
        config: TailerConfig,
        tx: mpsc::Sender<LogEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            tx,
            cancel,
            states: HashMap::new(),
            status: CollectorStatus::Idle,
            read_errors: 0,
            rotations: 0,
        }
    }

    /// 스캔 루프를 실행합니다. 첫 스캔은 즉시 수행됩니다.
    ///
    /// 취소되거나 출력 채널이 닫힐 때까지 실행됩니다.
    pub async fn run(&mut self) -> Result<(), ForwardError> {
        self.status = CollectorStatus::Running;
        info!(
            watch_dir = %self.config.watch_dir.display(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "file tailer started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.scan_once().await {
                Ok(0) => {}
                Ok(lines) => debug!(lines, "scan forwarded lines"),
                Err(ForwardError::Channel(reason)) => {
                    debug!(reason = %reason, "stopping file tailer");
                    break;
                }
                Err(e) => warn!(error = %e, "scan failed"),
            }
        }

        self.status = CollectorStatus::Stopped;
        info!(
            files = self.states.len(),
            rotations = self.rotations,
            read_errors = self.read_errors,
            "file tailer stopped"
        );
        Ok(())
    }

    /// 디렉토리를 한 번 스캔하고 내보낸 라인 수를 반환합니다.
    ///
    /// 출력 채널이 닫혔거나 취소되면 `ForwardError::Channel`을 반환합니다.
    /// 읽기 에러는 카운트 후 다음 스캔에서 재시도합니다.
    pub async fn scan_once(&mut self) -> Result<usize, ForwardError> {
        let listing = match list_regular_files(&self.config.watch_dir).await {
            Ok(listing) => listing,
            Err(e) => {
                self.record_read_error(&ForwardError::TailRead {
                    path: self.config.watch_dir.display().to_string(),
                    source: e,
                });
                return Ok(0);
            }
        };

        self.reconcile(&listing);
        metrics::gauge!(m::FILES_WATCHED).set(self.states.len() as f64);

        let mut emitted = 0;
        for (path, _) in &listing {
            let Some(mut state) = self.states.remove(path) else {
                continue;
            };
            let result = self.tail_file(&mut state).await;
            self.states.insert(path.clone(), state);

            match result {
                Ok(lines) => emitted += lines,
                Err(e @ ForwardError::Channel(_)) => return Err(e),
                Err(e) => self.record_read_error(&e),
            }
        }

        Ok(emitted)
    }

    /// 디렉토리 목록에 맞춰 추적 상태를 갱신합니다.
    ///
    /// 이름이 바뀐 파일은 기존 상태를 새 경로로 옮기고,
    /// 사라진 파일의 상태는 버리고, 새 파일은 offset 0에서 시작합니다.
    fn reconcile(&mut self, listing: &[(PathBuf, Metadata)]) {
        let current: HashMap<&Path, Option<FileIdentity>> = listing
            .iter()
            .map(|(path, meta)| (path.as_path(), FileIdentity::of(meta)))
            .collect();
        let by_identity: HashMap<FileIdentity, &Path> = current
            .iter()
            .filter_map(|(path, id)| id.map(|id| (id, *path)))
            .collect();

        // 1. 다른 경로로 옮겨간 파일
        let moved: Vec<(PathBuf, PathBuf)> = self
            .states
            .values()
            .filter_map(|state| {
                let identity = state.identity?;
                let target = *by_identity.get(&identity)?;
                let still_here = current.get(state.path.as_path()) == Some(&Some(identity));
                let renamed = !still_here && target != state.path.as_path();
                renamed.then(|| (state.path.clone(), target.to_path_buf()))
            })
            .collect();
        let mut relocated = Vec::with_capacity(moved.len());
        for (from, to) in moved {
            if let Some(mut state) = self.states.remove(&from) {
                info!(from = %from.display(), to = %to.display(), "following renamed file");
                state.path = to;
                relocated.push(state);
            }
        }

        // 2. 사라진 파일
        let vanished: Vec<PathBuf> = self
            .states
            .keys()
            .filter(|path| !current.contains_key(path.as_path()))
            .cloned()
            .collect();
        for path in vanished {
            if let Some(state) = self.states.remove(&path) {
                debug!(
                    path = %path.display(),
                    offset = state.offset,
                    idle_ms = state.last_seen.elapsed().as_millis() as u64,
                    "file removed, state discarded"
                );
            }
        }

        for state in relocated {
            self.states.insert(state.path.clone(), state);
        }

        // 3. 새 파일
        let now = Instant::now();
        for (path, meta) in listing {
            let state = self.states.entry(path.clone()).or_insert_with(|| {
                debug!(path = %path.display(), "watching new file");
                TailState::new(path.clone(), FileIdentity::of(meta))
            });
            state.last_seen = now;
        }
    }

    /// 파일 하나의 새 내용을 읽어 라인 단위로 내보냅니다.
    async fn tail_file(&mut self, state: &mut TailState) -> Result<usize, ForwardError> {
        let display_path = state.path.display().to_string();
        let tail_err = |source: io::Error| ForwardError::TailRead {
            path: display_path.clone(),
            source,
        };

        let mut file = File::open(&state.path).await.map_err(tail_err)?;
        let meta = file.metadata().await.map_err(tail_err)?;
        let identity = FileIdentity::of(&meta);
        let len = meta.len();

        let reason = if state.identity.is_some() && identity != state.identity {
            Some("identity changed")
        } else if len < state.offset {
            Some("truncated")
        } else if !head_matches(&mut file, &state.head).await.map_err(tail_err)? {
            Some("content replaced")
        } else {
            None
        };

        let mut emitted = 0;
        if let Some(reason) = reason {
            self.rotations += 1;
            metrics::counter!(m::FILE_ROTATIONS_TOTAL).increment(1);
            info!(
                path = %state.path.display(),
                reason,
                previous_offset = state.offset,
                "file rotated, reading from start"
            );
            if let Some(leftover) = state.reset(identity) {
                self.emit(leftover).await?;
                emitted += 1;
            }
        }
        state.identity = identity;

        if len == state.offset {
            return Ok(emitted);
        }

        file.seek(SeekFrom::Start(state.offset))
            .await
            .map_err(tail_err)?;
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];

        loop {
            let n = file.read(&mut buf).await.map_err(tail_err)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];

            if state.head.len() < HEAD_LEN {
                let take = (HEAD_LEN - state.head.len()).min(n);
                state.head.extend_from_slice(&chunk[..take]);
            }
            state.offset += n as u64;

            for line in state.take_lines(chunk) {
                self.emit(line).await?;
                emitted += 1;
            }
        }

        Ok(emitted)
    }

    async fn emit(&self, line: Bytes) -> Result<(), ForwardError> {
        let event = LogEvent::tailed(line);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(ForwardError::Channel("file tailer cancelled".to_owned()))
            }
            result = self.tx.send(event) => result
                .map_err(|_| ForwardError::Channel("normalizer intake closed".to_owned())),
        }
    }

    fn record_read_error(&mut self, error: &ForwardError) {
        self.read_errors += 1;
        metrics::counter!(m::TAIL_READ_ERRORS_TOTAL).increment(1);
        warn!(error = %error, "tail read failed, retrying next scan");
    }

    /// 추적 중인 파일 수
    pub fn watched_files(&self) -> usize {
        self.states.len()
    }

    /// 읽기 실패 횟수
    pub fn read_error_count(&self) -> u64 {
        self.read_errors
    }

    /// 감지한 로테이션 횟수
    pub fn rotation_count(&self) -> u64 {
        self.rotations
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }
}

/// 디렉토리 바로 아래의 일반 파일을 경로 순으로 반환합니다. 심볼릭 링크는 따라갑니다.
async fn list_regular_files(dir: &Path) -> io::Result<Vec<(PathBuf, Metadata)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => files.push((path, meta)),
            Ok(_) => {}
            // 목록 조회와 stat 사이에 삭제된 파일
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// 파일 앞부분이 `head`와 같은지 확인합니다.
async fn head_matches(file: &mut File, head: &[u8]) -> io::Result<bool> {
    if head.is_empty() {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(0)).await?;
    let mut current = vec![0u8; head.len()];
    match file.read_exact(&mut current).await {
        Ok(_) => Ok(current == head),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
