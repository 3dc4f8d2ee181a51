//! The synchronous entry points, driven from plain threads against a
//! downloader-owned runtime.

mod support;

use chunkload_core::download::{
    Chunk, DownloadError, Downloader, DownloaderConfig, MemorySink, RequestOptions, ResourceSize,
    SessionOutcome, Sink, TransferRequest,
};
use support::range_server::{RangeResponder, mount_resource, pattern_body};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::MockServer;

fn owned_downloader() -> Downloader {
    Downloader::new(DownloaderConfig {
        max_workers: 3,
        min_bytes_per_worker: 1_000,
        read_chunk_size: 700,
        worker_threads: Some(2),
        ..DownloaderConfig::default()
    })
    .expect("downloader builds")
}

fn serve(route: &str, responder: RangeResponder) -> Option<MockServer> {
    let server = tokio_test::block_on(start_mock_server_or_skip())?;
    tokio_test::block_on(mount_resource(&server, route, responder));
    Some(server)
}

#[test]
fn test_probe_blocking_reports_size() {
    let Some(server) = serve("/p.bin", RangeResponder::new(pattern_body(3_210))) else {
        return;
    };
    let dl = owned_downloader();
    let size = dl
        .probe_blocking(&format!("{}/p.bin", server.uri()), &RequestOptions::default())
        .unwrap();
    assert_eq!(size, ResourceSize::Known(3_210));
    dl.close();
}

#[test]
fn test_download_blocking_iterates_all_chunks() {
    let body = pattern_body(3_000);
    let Some(server) = serve("/it.bin", RangeResponder::new(body.clone())) else {
        return;
    };
    let dl = owned_downloader();
    let chunks = dl
        .download_blocking(&format!("{}/it.bin", server.uri()), &RequestOptions::default())
        .unwrap();
    assert_eq!(chunks.worker_count(), 3);

    let mut collected: Vec<Chunk> = chunks.map(Result::unwrap).collect();
    collected.sort_by_key(|c| c.offset);
    let joined: Vec<u8> = collected.iter().flat_map(|c| c.data.to_vec()).collect();
    assert_eq!(joined, body);
    dl.close();
}

#[test]
fn test_get_and_save_blocking() {
    let body = pattern_body(2_500);
    let Some(server) = serve("/gs.bin", RangeResponder::new(body.clone())) else {
        return;
    };
    let dl = owned_downloader();
    let url = format!("{}/gs.bin", server.uri());

    let bytes = dl.get_blocking(&url, &RequestOptions::default()).unwrap();
    assert_eq!(bytes.as_ref(), body.as_slice());

    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("gs.bin");
    let report = dl
        .save_blocking(&url, &RequestOptions::default(), Sink::File(target.clone()))
        .unwrap();
    assert_eq!(report.bytes, 2_500);
    assert_eq!(std::fs::read(&target).unwrap(), body);
    dl.close();
}

#[test]
fn test_blocking_iterator_ends_with_cancelled_after_cancel() {
    let Some(server) = serve(
        "/c.bin",
        RangeResponder::new(pattern_body(3_000)).delay(std::time::Duration::from_secs(30)),
    ) else {
        return;
    };
    let dl = owned_downloader();
    let mut chunks = dl
        .download_blocking(&format!("{}/c.bin", server.uri()), &RequestOptions::default())
        .unwrap();
    chunks.cancel();
    match chunks.next() {
        Some(Err(e)) => assert!(e.is_cancelled(), "unexpected error: {e:?}"),
        other => panic!("Expected cancellation, got: {other:?}"),
    }
    assert!(chunks.next().is_none());
    dl.close();
}

#[test]
fn test_sessions_from_plain_thread() {
    let Some(server) = serve("/s.bin", RangeResponder::new(pattern_body(5_000))) else {
        return;
    };
    let dl = owned_downloader();
    let memory = MemorySink::new();
    let session = dl
        .start(
            TransferRequest::new(format!("{}/s.bin", server.uri())),
            Sink::Memory(memory.clone()),
        )
        .unwrap();
    let outcome = dl.wait_blocking(&session);
    assert!(matches!(outcome, SessionOutcome::Finished { bytes: 5_000 }));
    assert_eq!(memory.len(), 5_000);
    dl.close();
}

#[test]
fn test_blocking_precondition_errors() {
    let dl = owned_downloader();
    let result = dl.get_blocking("not a url", &RequestOptions::default());
    assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));

    let options = RequestOptions::new().with_proxy("socks5://127.0.0.1:1080");
    let result = dl.probe_blocking("https://example.com/a", &options);
    assert!(matches!(result, Err(DownloadError::InvalidProxy { .. })));
    dl.close();
}

#[test]
fn test_invalid_config_rejected() {
    let result = Downloader::new(DownloaderConfig {
        worker_threads: Some(0),
        ..DownloaderConfig::default()
    });
    assert!(matches!(result, Err(DownloadError::InvalidOptions { .. })));
}

#[test]
fn test_blocking_iterator_reports_close_instead_of_clean_end() {
    let Some(server) = serve(
        "/closing.bin",
        RangeResponder::new(pattern_body(3_000)).delay(std::time::Duration::from_secs(30)),
    ) else {
        return;
    };
    let dl = owned_downloader();
    let mut chunks = dl
        .download_blocking(&format!("{}/closing.bin", server.uri()), &RequestOptions::default())
        .unwrap();
    dl.close();

    match chunks.next() {
        Some(Err(e)) => assert!(
            e.is_cancelled() || matches!(e, DownloadError::Closed),
            "unexpected error: {e:?}"
        ),
        other => panic!("Expected an error after close, got: {other:?}"),
    }
    assert!(chunks.next().is_none());
}
