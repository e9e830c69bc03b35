//! Integration tests for the file tailer against a real file on disk.

use std::{io::Write, time::Duration};

use tokio::time::timeout;
use vigil::tailer::{FileTailer, LineSource, TailError};

const POLL: Duration = Duration::from_millis(10);
const WAIT: Duration = Duration::from_secs(5);

async fn next(tailer: &mut FileTailer) -> String {
    timeout(WAIT, tailer.next_line()).await.expect("timed out waiting for a line").unwrap()
}

#[tokio::test]
async fn skips_history_and_reads_appended_lines() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "historical line").unwrap();
    file.flush().unwrap();

    let mut tailer = FileTailer::open(file.path(), POLL).await.unwrap();

    writeln!(file, "first new line").unwrap();
    writeln!(file, "second new line").unwrap();
    file.flush().unwrap();

    // The pre-open content must never appear.
    assert_eq!(next(&mut tailer).await, "first new line");
    assert_eq!(next(&mut tailer).await, "second new line");
}

#[tokio::test]
async fn polls_until_new_data_arrives() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut tailer = FileTailer::open(file.path(), POLL).await.unwrap();

    let path = file.path().to_path_buf();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut handle = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(handle, "late line").unwrap();
    });

    assert_eq!(next(&mut tailer).await, "late line");
    writer.await.unwrap();
}

#[tokio::test]
async fn surfaces_a_partial_write_as_a_fragment() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let mut tailer = FileTailer::open(file.path(), POLL).await.unwrap();

    // No trailing newline: this models a read racing a writer mid-record.
    write!(file, "half a reco").unwrap();
    file.flush().unwrap();

    assert_eq!(next(&mut tailer).await, "half a reco");

    // Subsequent complete lines resume normally.
    writeln!(file, "rd tail").unwrap();
    writeln!(file, "whole line").unwrap();
    file.flush().unwrap();
    assert_eq!(next(&mut tailer).await, "rd tail");
    assert_eq!(next(&mut tailer).await, "whole line");
}

#[tokio::test]
async fn strips_carriage_returns() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let mut tailer = FileTailer::open(file.path(), POLL).await.unwrap();

    write!(file, "windows line\r\n").unwrap();
    file.flush().unwrap();

    assert_eq!(next(&mut tailer).await, "windows line");
}

#[tokio::test]
async fn rereads_from_the_start_after_truncation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let mut tailer = FileTailer::open(file.path(), POLL).await.unwrap();

    writeln!(file, "before truncation").unwrap();
    file.flush().unwrap();
    assert_eq!(next(&mut tailer).await, "before truncation");

    // Truncate in place (copytruncate-style rotation) and write fresh data.
    let handle = std::fs::OpenOptions::new().write(true).open(file.path()).unwrap();
    handle.set_len(0).unwrap();
    let mut handle = std::fs::OpenOptions::new().append(true).open(file.path()).unwrap();
    writeln!(handle, "after truncation").unwrap();

    assert_eq!(next(&mut tailer).await, "after truncation");
}

#[tokio::test]
async fn follows_a_rename_rotation_without_replaying_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.log");
    std::fs::write(&path, "old line one\nold line two\n").unwrap();

    let mut tailer = FileTailer::open(&path, POLL).await.unwrap();

    let mut old = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(old, "old line three").unwrap();
    assert_eq!(next(&mut tailer).await, "old line three");

    // Rename-style rotation: the old file moves aside and a new, smaller
    // file takes its place. The old file's pre-open history must not come
    // back; only the new file's content follows.
    std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
    std::fs::write(&path, "fresh line\n").unwrap();

    assert_eq!(next(&mut tailer).await, "fresh line");
}

#[tokio::test]
async fn follows_a_rename_rotation_to_a_larger_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.log");
    std::fs::write(&path, "a\n").unwrap();

    let mut tailer = FileTailer::open(&path, POLL).await.unwrap();

    // The replacement is larger than everything consumed from the old
    // handle; the tailer must still notice the swap and make progress.
    std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
    std::fs::write(&path, "first after rotation\nsecond after rotation\n").unwrap();

    assert_eq!(next(&mut tailer).await, "first after rotation");
    assert_eq!(next(&mut tailer).await, "second after rotation");
}

#[tokio::test]
async fn open_fails_for_a_missing_file() {
    let result = FileTailer::open("/nonexistent/access.log", POLL).await;
    assert!(matches!(result, Err(TailError::Open { .. })));
}
