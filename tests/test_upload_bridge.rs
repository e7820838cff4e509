// tests/test_upload_bridge.rs
//
// Streaming writes: memory vs spill, declared lengths, failures at close.

mod common;

use std::io::Write;

use anyhow::Result;
use common::{BUCKET, config, fixture, fixture_with};
use s3fs_lite::{FsConfig, FsError, OpenOption};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn spill_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with("s3."))
                .count()
        })
        .unwrap_or(0)
}

#[test]
fn spilled_and_buffered_uploads_are_identical() -> Result<()> {
    let spill = tempfile::tempdir()?;
    let fx = fixture_with(FsConfig {
        upload_memory_ceiling: 64 * 1024,
        spill_dir: Some(spill.path().to_path_buf()),
        ..config()
    });

    let small = pattern(16 * 1024);
    let large = pattern(1024 * 1024 + 17);

    fx.write("small.bin", &small, &[])?;
    {
        // Many small writes, so the spill crosses chunk boundaries.
        let mut writer = fx.provider.open_write(&fx.path("large.bin"), &[])?;
        for piece in large.chunks(4000) {
            writer.write_all(piece)?;
        }
        writer.close()?;
    }

    assert_eq!(fx.backend.get_bytes(BUCKET, "small.bin").as_deref(), Some(&small[..]));
    assert_eq!(fx.backend.get_bytes(BUCKET, "large.bin").as_deref(), Some(&large[..]));
    assert_eq!(fx.read("large.bin")?, large);
    assert_eq!(spill_files(spill.path()), 0, "spill file left behind");
    Ok(())
}

#[test]
fn spill_file_is_removed_when_the_put_fails() -> Result<()> {
    let spill = tempfile::tempdir()?;
    let fx = fixture_with(FsConfig {
        upload_memory_ceiling: 64 * 1024,
        spill_dir: Some(spill.path().to_path_buf()),
        ..config()
    });
    fx.backend.set_put_failure(Some("service unavailable"));

    let err = fx.write("doomed.bin", &pattern(1024 * 1024), &[]).unwrap_err();
    assert!(matches!(err, FsError::UploadFailed { .. }), "got {err}");
    assert!(fx.backend.get_bytes(BUCKET, "doomed.bin").is_none());
    assert_eq!(spill_files(spill.path()), 0, "spill file left behind");
    Ok(())
}

#[test]
fn abort_while_spilling_removes_the_spill_file() -> Result<()> {
    let spill = tempfile::tempdir()?;
    let fx = fixture_with(FsConfig {
        upload_memory_ceiling: 64 * 1024,
        spill_dir: Some(spill.path().to_path_buf()),
        ..config()
    });

    let mut writer = fx.provider.open_write(&fx.path("aborted.bin"), &[])?;
    for piece in pattern(512 * 1024).chunks(8192) {
        writer.write_all(piece)?;
    }
    writer.flush()?;
    writer.abort();

    assert!(fx.backend.get_bytes(BUCKET, "aborted.bin").is_none());
    assert_eq!(spill_files(spill.path()), 0, "spill file left behind");
    Ok(())
}

#[test]
fn empty_write_creates_an_empty_object() -> Result<()> {
    let fx = fixture();
    let mut writer = fx.provider.open_write(&fx.path("empty.bin"), &[])?;
    writer.close()?;
    assert_eq!(fx.backend.get_bytes(BUCKET, "empty.bin").map(|b| b.len()), Some(0));

    let mut known = fx
        .provider
        .open_write(&fx.path("empty-known.bin"), &[OpenOption::ContentLength(0)])?;
    known.close()?;
    assert_eq!(fx.backend.get_bytes(BUCKET, "empty-known.bin").map(|b| b.len()), Some(0));
    Ok(())
}

#[test]
fn known_length_streams_exact_content() -> Result<()> {
    let fx = fixture();
    let data = pattern(300 * 1024);
    fx.write(
        "known.bin",
        &data,
        &[OpenOption::ContentLength(data.len() as u64), OpenOption::ContentType("application/x-test".into())],
    )?;
    assert_eq!(fx.read("known.bin")?, data);
    assert_eq!(fx.backend.content_type(BUCKET, "known.bin").as_deref(), Some("application/x-test"));
    Ok(())
}

#[test]
fn known_length_mismatch_fails_at_close() {
    let fx = fixture();

    let short = fx.write("short.bin", b"abc", &[OpenOption::ContentLength(10)]);
    assert!(matches!(short, Err(FsError::UploadFailed { .. })), "got {short:?}");

    let mut long = fx
        .provider
        .open_write(&fx.path("long.bin"), &[OpenOption::ContentLength(2)])
        .unwrap();
    // The write may already see the pipe break; the cause is reported at close.
    let _ = long.write_all(b"too many bytes");
    assert!(matches!(long.close(), Err(FsError::UploadFailed { .. })));

    assert!(fx.backend.get_bytes(BUCKET, "short.bin").is_none());
    assert!(fx.backend.get_bytes(BUCKET, "long.bin").is_none());
}

#[test]
fn backend_failure_surfaces_at_close() {
    let fx = fixture();
    fx.backend.set_put_failure(Some("disk full"));
    let err = fx.write("doomed.txt", b"payload", &[]).unwrap_err();
    match err {
        FsError::UploadFailed { target, reason } => {
            assert_eq!(target, "/doomed.txt");
            assert!(reason.contains("disk full"), "reason: {reason}");
        }
        other => panic!("expected UploadFailed, got {other:?}"),
    }
}

#[test]
fn close_is_idempotent() -> Result<()> {
    let fx = fixture();
    let mut writer = fx.provider.open_write(&fx.path("once.txt"), &[])?;
    writer.write_all(b"once")?;
    writer.close()?;
    writer.close()?;
    assert!(writer.write_all(b"again").is_err());
    Ok(())
}

#[test]
fn abort_discards_the_upload() -> Result<()> {
    let fx = fixture();
    let mut writer = fx.provider.open_write(&fx.path("aborted.txt"), &[])?;
    writer.write_all(b"partial")?;
    writer.abort();
    assert!(fx.backend.get_bytes(BUCKET, "aborted.txt").is_none());
    Ok(())
}

#[test]
fn create_new_refuses_existing_objects() -> Result<()> {
    let fx = fixture();
    fx.seed("taken.txt", b"first");
    let options = [OpenOption::Write, OpenOption::CreateNew];

    let err = fx.provider.open_write(&fx.path("taken.txt"), &options).unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists(_)));

    fx.write("fresh.txt", b"new", &options)?;
    assert_eq!(fx.read("fresh.txt")?, b"new");
    Ok(())
}

#[test]
fn create_new_loses_a_race_at_close() -> Result<()> {
    let fx = fixture();
    let options = [OpenOption::Write, OpenOption::CreateNew];
    let mut writer = fx.provider.open_write(&fx.path("race.txt"), &options)?;
    writer.write_all(b"mine")?;

    // Another writer creates the object between the check and the put.
    fx.seed("race.txt", b"theirs");
    assert!(matches!(writer.close(), Err(FsError::AlreadyExists(_))));
    assert_eq!(fx.read("race.txt")?, b"theirs");
    Ok(())
}

#[test]
fn must_exist_mode_requires_the_object() -> Result<()> {
    let fx = fixture();
    let options = [OpenOption::Write, OpenOption::TruncateExisting];
    let err = fx.provider.open_write(&fx.path("missing.txt"), &options).unwrap_err();
    assert!(err.is_not_found());

    fx.seed("present.txt", b"old contents");
    fx.write("present.txt", b"new", &options)?;
    assert_eq!(fx.read("present.txt")?, b"new");
    Ok(())
}

#[test]
fn unsupported_open_options_fail_before_any_request() {
    let fx = fixture();
    for bad in [OpenOption::Append, OpenOption::Sync, OpenOption::Dsync] {
        let err = fx
            .provider
            .open_write(&fx.path("x.txt"), &[OpenOption::Write, bad.clone()])
            .unwrap_err();
        assert!(matches!(err, FsError::UnsupportedOperation(_)), "{bad:?}: {err}");
    }
    let err = fx.provider.open_write(&fx.path("dir/"), &[]).unwrap_err();
    assert!(matches!(err, FsError::InvalidArgument(_)));
    assert!(fx.backend.keys(BUCKET).is_empty());
}

#[test]
fn delete_on_close_removes_after_upload() -> Result<()> {
    let fx = fixture();
    fx.write("scratch.txt", b"temporary", &[OpenOption::DeleteOnClose])?;
    assert!(fx.backend.get_bytes(BUCKET, "scratch.txt").is_none());
    Ok(())
}

#[test]
fn closing_the_file_system_closes_open_writers() -> Result<()> {
    let fx = fixture();
    let path = fx.path("pending.txt");
    let fs = path.file_system().clone();

    let mut writer = fx.provider.open_write(&path, &[])?;
    writer.write_all(b"flushed by close")?;
    assert_eq!(fs.open_resource_count(), 1);

    fs.close()?;
    assert_eq!(fs.open_resource_count(), 0);
    assert_eq!(fx.backend.get_bytes(BUCKET, "pending.txt").as_deref(), Some(&b"flushed by close"[..]));

    // The handle is closed already; closing it again is a no-op.
    writer.close()?;
    assert!(matches!(fx.provider.open_write(&path, &[]), Err(FsError::ClosedFilesystem(_))));
    Ok(())
}

#[test]
fn readers_are_tracked_until_closed() -> Result<()> {
    let fx = fixture();
    fx.seed("tracked.txt", b"x");
    let path = fx.path("tracked.txt");
    let fs = path.file_system().clone();

    let mut reader = fx.provider.open_read(&path, &[])?;
    assert_eq!(fs.open_resource_count(), 1);
    reader.close()?;
    assert_eq!(fs.open_resource_count(), 0);

    let reader = fx.provider.open_read(&path, &[])?;
    drop(reader);
    assert_eq!(fs.open_resource_count(), 0);
    Ok(())
}
