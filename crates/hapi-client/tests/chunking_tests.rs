//! Chunked fetches must be indistinguishable from direct ones.

mod common;

use common::{client, options, FakeServer, SERVER};
use hapi_client::{CacheLayout, ChunkSize, DataRequest, Encoding, HapiError, RequestOptions};
use test_utils::scalar_value;

const START: &str = "1970-01-01T12:00:00Z";
const STOP: &str = "1970-01-03T06:00:00Z";

#[tokio::test]
async fn test_chunked_and_direct_fetches_agree() {
    let dir = tempfile::tempdir().unwrap();
    let (hapi, server) = client(FakeServer::new());

    let (direct, _) = hapi
        .fetch(SERVER, "minutely", "", START, STOP, &options(&dir.path().join("direct")))
        .await
        .unwrap();
    assert_eq!(direct.len(), 42 * 60);
    assert_eq!(server.data_requests().len(), 1);

    let variants = [
        RequestOptions {
            n_chunks: Some(4),
            ..options(&dir.path().join("n-seq"))
        },
        RequestOptions {
            n_chunks: Some(4),
            parallel: true,
            ..options(&dir.path().join("n-par"))
        },
        RequestOptions {
            dt_chunk: Some(ChunkSize::Infer),
            ..options(&dir.path().join("infer-seq"))
        },
        RequestOptions {
            dt_chunk: Some(ChunkSize::Infer),
            parallel: true,
            n_parallel: 2,
            ..options(&dir.path().join("infer-par"))
        },
        RequestOptions {
            dt_chunk: Some(ChunkSize::Hour),
            parallel: true,
            ..options(&dir.path().join("hour-par"))
        },
    ];
    let expected_chunks = [4, 4, 3, 3, 42];

    for (opts, chunks) in variants.iter().zip(expected_chunks) {
        let before = server.data_requests().len();
        let (chunked, meta) = hapi
            .fetch(SERVER, "minutely", "", START, STOP, opts)
            .await
            .unwrap();
        assert_eq!(chunked, direct, "{:?}", opts);
        assert_eq!(meta.provenance.chunks, Some(chunks));
        assert_eq!(server.data_requests().len() - before, chunks);
    }
}

#[tokio::test]
async fn test_chunk_boundaries_are_exact() {
    let dir = tempfile::tempdir().unwrap();
    let (hapi, server) = client(FakeServer::new());
    let opts = RequestOptions {
        dt_chunk: Some(ChunkSize::Day),
        ..options(dir.path())
    };

    let (result, _) = hapi
        .fetch(
            SERVER,
            "dataset1",
            "scalar",
            "1970-01-01T00:10:00Z",
            "1970-01-01T00:11:00Z",
            &opts,
        )
        .await
        .unwrap();

    // The single day-long chunk is trimmed back to the requested minute
    let data = server.data_requests();
    assert_eq!(data.len(), 1);
    assert!(data[0].contains("start=1970-01-01T00:00:00Z&stop=1970-01-02T00:00:00Z"));

    let times = result.times().unwrap();
    assert_eq!(times.len(), 60);
    assert_eq!(times[0], "1970-01-01T00:10:00.000Z");
    assert_eq!(times[59], "1970-01-01T00:10:59.000Z");
    let scalars = result.column("scalar").unwrap().values.as_f64().unwrap();
    assert_eq!(scalars[0], scalar_value(600));
    assert_eq!(scalars[59], scalar_value(659));
}

#[tokio::test]
async fn test_month_chunks_follow_the_calendar() {
    let dir = tempfile::tempdir().unwrap();
    let (hapi, server) = client(FakeServer::new());
    let opts = RequestOptions {
        dt_chunk: Some(ChunkSize::Month),
        ..options(dir.path())
    };

    let (result, _) = hapi
        .fetch(
            SERVER,
            "minutely",
            "scalarint",
            "1970-01-31T23:00:00Z",
            "1970-02-01T01:00:00Z",
            &opts,
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 120);

    let data = server.data_requests();
    assert_eq!(data.len(), 2);
    assert!(data[0].contains("start=1970-01-01T00:00:00Z&stop=1970-02-01T00:00:00Z"));
    assert!(data[1].contains("start=1970-02-01T00:00:00Z&stop=1970-03-01T00:00:00Z"));
}

#[tokio::test]
async fn test_short_request_is_not_chunked() {
    let dir = tempfile::tempdir().unwrap();
    let (hapi, server) = client(FakeServer::new());
    let opts = RequestOptions {
        dt_chunk: Some(ChunkSize::Infer),
        ..options(dir.path())
    };

    let (result, meta) = hapi
        .fetch(
            SERVER,
            "minutely",
            "scalar",
            "1970-01-01T00:00:00Z",
            "1970-01-01T06:00:00Z",
            &opts,
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 360);
    assert_eq!(meta.provenance.chunks, None);
    assert_eq!(server.data_requests().len(), 1);
}

#[tokio::test]
async fn test_failed_chunk_fails_the_fetch() {
    for parallel in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let (hapi, _server) =
            client(FakeServer::new().failing("start=1970-01-02T00:00:00Z&stop=1970-01-03"));
        let opts = RequestOptions {
            dt_chunk: Some(ChunkSize::Day),
            parallel,
            ..options(dir.path())
        };

        let err = hapi
            .fetch(SERVER, "minutely", "scalar", START, STOP, &opts)
            .await
            .unwrap_err();
        match err {
            HapiError::Chunk {
                index,
                start,
                stop,
                source,
            } => {
                assert_eq!(index, 1);
                assert_eq!(start, "1970-01-02T00:00:00Z");
                assert_eq!(stop, "1970-01-03T00:00:00Z");
                assert!(matches!(*source, HapiError::Transport { .. }));
            }
            other => panic!("unexpected error: {}", other),
        }

        // No partial result is recorded for the whole request
        let request = DataRequest::new(SERVER, "minutely", "scalar", START, STOP);
        let paths = CacheLayout::new(dir.path()).request_paths(&request, Encoding::Binary);
        assert!(!paths.meta.exists());
        assert!(!paths.snapshot.exists());
    }
}

#[tokio::test]
async fn test_cadence_is_measured_when_undeclared() {
    let dir = tempfile::tempdir().unwrap();
    let (hapi, server) = client(FakeServer::new());
    let opts = RequestOptions {
        dt_chunk: Some(ChunkSize::Infer),
        ..options(dir.path())
    };

    let (result, meta) = hapi
        .fetch(
            SERVER,
            "nocadence",
            "scalar",
            "1970-01-01T00:00:00Z",
            "1970-01-03T00:00:00Z",
            &opts,
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 2 * 24 * 60);
    assert_eq!(meta.provenance.chunks, Some(2));

    let data = server.data_requests();
    assert_eq!(data.len(), 3);
    assert!(data[0].contains("start=1970-01-01T00:00:00Z&stop=1970-01-01T01:00:00Z"));

    // The cadence window itself is not cached
    let window = DataRequest::new(
        SERVER,
        "nocadence",
        "scalar",
        "1970-01-01T00:00:00Z",
        "1970-01-01T01:00:00Z",
    );
    let paths = CacheLayout::new(dir.path()).request_paths(&window, Encoding::Binary);
    assert!(!paths.snapshot.exists());
    assert!(!paths.raw.exists());
}

#[tokio::test]
async fn test_cadence_window_covering_request_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let (hapi, server) = client(FakeServer::new());
    let opts = RequestOptions {
        dt_chunk: Some(ChunkSize::Infer),
        ..options(dir.path())
    };

    let (result, meta) = hapi
        .fetch(
            SERVER,
            "nocadence",
            "",
            "1970-01-01T00:00:00Z",
            "1970-01-01T00:30:00Z",
            &opts,
        )
        .await
        .unwrap();
    assert_eq!(result.len(), 30);
    assert_eq!(meta.provenance.chunks, None);

    let data = server.data_requests();
    assert_eq!(data.len(), 1);
    assert!(data[0].contains("start=1970-01-01T00:00:00Z&stop=1970-01-01T00:30:00Z"));

    // The reused fetch is cached like any direct one
    let request = DataRequest::new(
        SERVER,
        "nocadence",
        "",
        "1970-01-01T00:00:00Z",
        "1970-01-01T00:30:00Z",
    );
    let paths = CacheLayout::new(dir.path()).request_paths(&request, Encoding::Binary);
    assert!(paths.raw.exists());
    assert!(paths.snapshot.exists());
    assert_eq!(meta.provenance.data_file, Some(paths.raw.display().to_string()));
}
