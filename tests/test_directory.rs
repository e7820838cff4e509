// tests/test_directory.rs
//
// Directory emulation: existence classification and listings.

mod common;

use anyhow::Result;
use common::{config, fixture, fixture_with};
use s3fs_lite::{EntryFilter, EntryKind, FsConfig, FsError, S3Path};

fn names(entries: impl IntoIterator<Item = s3fs_lite::Result<S3Path>>) -> Vec<String> {
    entries
        .into_iter()
        .map(|e| e.expect("listing entry").to_string())
        .collect()
}

#[test]
fn listing_yields_children_but_not_the_directory_itself() -> Result<()> {
    let fx = fixture();
    fx.seed("alpha/", b"");
    fx.seed("alpha/hello.txt", b"1");
    fx.seed("alpha/world.txt", b"2");

    let mut stream = fx.provider.list(&fx.path("alpha/"))?;
    assert_eq!(names(stream.iter()?), ["/alpha/hello.txt", "/alpha/world.txt"]);
    Ok(())
}

#[test]
fn doubled_separators_do_not_list_the_directory_itself() -> Result<()> {
    let fx = fixture();
    fx.seed("alpha/hello.txt", b"1");
    fx.seed("alpha//x", b"2");

    let mut stream = fx.provider.list(&fx.path("alpha/"))?;
    let listed = names(stream.iter()?);
    assert!(!listed.contains(&"/alpha/".to_string()), "listed itself: {listed:?}");
    assert_eq!(listed, ["/alpha/hello.txt"]);
    Ok(())
}

#[test]
fn listing_rolls_up_subdirectories() -> Result<()> {
    let fx = fixture();
    for key in ["alpha/sub/deep.txt", "alpha/sub/deeper/x.txt", "alpha/top.txt", "beta.txt"] {
        fx.seed(key, b"x");
    }

    let mut stream = fx.provider.list(&fx.path("alpha"))?;
    assert_eq!(names(stream.iter()?), ["/alpha/sub/", "/alpha/top.txt"]);

    let mut root = fx.provider.list(&fx.path(""))?;
    assert_eq!(names(root.iter()?), ["/alpha/", "/beta.txt"]);
    Ok(())
}

#[test]
fn listing_follows_continuation_pages() -> Result<()> {
    let fx = fixture_with(FsConfig { list_page_size: Some(2), ..config() });
    let keys: Vec<String> = (0..7).map(|i| format!("many/file-{i:02}")).collect();
    for key in &keys {
        fx.backend.put_bytes(common::BUCKET, key, &b"x"[..]);
    }

    let mut stream = fx.provider.list(&fx.path("many/"))?;
    let listed = names(stream.iter()?);
    let expected: Vec<String> = keys.iter().map(|k| format!("/{k}")).collect();
    assert_eq!(listed, expected);
    Ok(())
}

#[test]
fn filter_selects_entries() -> Result<()> {
    let fx = fixture();
    for key in ["logs/a.log", "logs/b.txt", "logs/c.log"] {
        fx.seed(key, b"x");
    }
    let filter: EntryFilter = Box::new(|p: &S3Path| Ok(p.to_string().ends_with(".log")));
    let mut stream = fx.provider.new_directory_stream(&fx.path("logs/"), filter)?;
    assert_eq!(names(stream.iter()?), ["/logs/a.log", "/logs/c.log"]);
    Ok(())
}

#[test]
fn filter_errors_are_yielded_and_listing_continues() -> Result<()> {
    let fx = fixture();
    for key in ["logs/a.log", "logs/bad.log", "logs/c.log"] {
        fx.seed(key, b"x");
    }
    let filter: EntryFilter = Box::new(|p: &S3Path| {
        if p.to_string().contains("bad") {
            Err(FsError::InvalidArgument(format!("rejected {p}")))
        } else {
            Ok(true)
        }
    });
    let mut stream = fx.provider.new_directory_stream(&fx.path("logs/"), filter)?;
    let results: Vec<_> = stream.iter()?.collect();

    assert_eq!(results.len(), 3);
    assert!(matches!(results[1], Err(FsError::InvalidArgument(_))));
    assert_eq!(results[2].as_ref().map(ToString::to_string).ok().as_deref(), Some("/logs/c.log"));
    Ok(())
}

#[test]
fn stream_iterates_once_and_not_after_close() -> Result<()> {
    let fx = fixture();
    fx.seed("alpha/hello.txt", b"x");

    let mut stream = fx.provider.list(&fx.path("alpha/"))?;
    let _ = stream.iter()?;
    assert!(matches!(stream.iter(), Err(FsError::IllegalState(_))));

    let mut closed = fx.provider.list(&fx.path("alpha/"))?;
    closed.close();
    assert!(matches!(closed.iter(), Err(FsError::IllegalState(_))));
    Ok(())
}

#[test]
fn closing_stops_an_iterator_in_progress() -> Result<()> {
    let fx = fixture();
    for key in ["alpha/a", "alpha/b", "alpha/c"] {
        fx.seed(key, b"x");
    }
    let mut stream = fx.provider.list(&fx.path("alpha/"))?;
    let mut iter = stream.iter()?;
    assert!(iter.next().is_some());
    stream.close();
    assert!(iter.next().is_none());
    Ok(())
}

#[test]
fn exists_classifies_paths() -> Result<()> {
    let fx = fixture();
    fx.seed("alpha/hello.txt", b"x");
    fx.seed("empty/", b"");

    assert_eq!(fx.provider.exists(&fx.path(""))?, EntryKind::Directory);
    assert_eq!(fx.provider.exists(&fx.path("alpha"))?, EntryKind::Directory);
    assert_eq!(fx.provider.exists(&fx.path("alpha/"))?, EntryKind::Directory);
    assert_eq!(fx.provider.exists(&fx.path("empty/"))?, EntryKind::Directory);
    assert_eq!(fx.provider.exists(&fx.path("alpha/hello.txt"))?, EntryKind::File);
    assert_eq!(fx.provider.exists(&fx.path("alpha/nothing"))?, EntryKind::Absent);
    assert_eq!(fx.provider.exists(&fx.path("nothing/"))?, EntryKind::Absent);
    Ok(())
}

#[test]
fn root_is_a_directory_even_in_an_empty_bucket() -> Result<()> {
    let fx = fixture();
    let root = fx.path("");
    assert!(root.is_root());
    assert_eq!(fx.provider.exists(&root)?, EntryKind::Directory);
    let mut stream = fx.provider.list(&root)?;
    assert_eq!(stream.iter()?.count(), 0);
    Ok(())
}
