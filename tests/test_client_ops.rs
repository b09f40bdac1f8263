//! Open/close, mkdir, remove and list semantics.

mod common;

use common::{Harness, write_file};
use ripplefs::vfs::FsError;

#[tokio::test]
async fn test_open_missing_without_create_is_not_found() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    let err = client.open("/nope", false, false).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_open_rejects_malformed_paths() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    for bad in ["relative", "/trailing/", "", "/"] {
        let err = client.open(bad, true, true).await.unwrap_err();
        assert!(matches!(err, FsError::InvalidPath(_)), "path {bad:?}");
    }
}

#[tokio::test]
async fn test_open_missing_parent_is_not_found() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    let err = client.open("/a/b", true, true).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_open_directory_is_type_mismatch() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    client.mkdir("/dir").await.unwrap();
    let err = client.open("/dir", false, true).await.unwrap_err();
    assert!(matches!(err, FsError::TypeMismatch(_)));
}

#[tokio::test]
async fn test_open_under_file_parent_is_type_mismatch() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    write_file(&client, "/f", 0, b"x").await.unwrap();
    let err = client.open("/f/child", true, true).await.unwrap_err();
    assert!(matches!(err, FsError::TypeMismatch(_)));
}

#[tokio::test]
async fn test_close_twice_is_invalid_handle() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    let fd = client.open("/f", true, true).await.unwrap();
    client.close(fd).await.unwrap();
    assert!(matches!(
        client.close(fd).await.unwrap_err(),
        FsError::InvalidHandle(_)
    ));
}

#[tokio::test]
async fn test_descriptors_are_recycled() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    let fd_a = client.open("/a", true, true).await.unwrap();
    let fd_b = client.open("/b", true, true).await.unwrap();
    assert_ne!(fd_a, fd_b);
    client.close(fd_a).await.unwrap();
    let fd_c = client.open("/c", true, true).await.unwrap();
    assert_eq!(fd_c, fd_a);
    client.close(fd_b).await.unwrap();
    client.close(fd_c).await.unwrap();
}

#[tokio::test]
async fn test_mkdir_then_open_file_inside() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    client.mkdir("/a").await.unwrap();
    let fd = client.open("/a/f", true, true).await.unwrap();
    client.close(fd).await.unwrap();
    assert_eq!(client.list("/a").await.unwrap(), vec!["f".to_string()]);
}

#[tokio::test]
async fn test_mkdir_is_not_recursive() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    let err = client.mkdir("/a/b").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_mkdir_duplicate_is_already_exists() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    client.mkdir("/a").await.unwrap();
    assert!(matches!(
        client.mkdir("/a").await.unwrap_err(),
        FsError::AlreadyExists(_)
    ));
}

#[tokio::test]
async fn test_remove_missing_is_not_found() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    assert!(matches!(
        client.remove("/ghost").await.unwrap_err(),
        FsError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_remove_file_then_gone() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    write_file(&client, "/f", 0, b"x").await.unwrap();
    client.remove("/f").await.unwrap();
    assert!(matches!(
        client.open("/f", false, false).await.unwrap_err(),
        FsError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_recursive_remove_empties_root() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    client.mkdir("/a").await.unwrap();
    write_file(&client, "/a/b", 0, b"x").await.unwrap();
    client.mkdir("/a/c").await.unwrap();
    write_file(&client, "/a/c/d", 0, b"y").await.unwrap();
    client.remove("/a").await.unwrap();
    assert!(client.list("/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_root_is_rejected() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    assert!(matches!(
        client.remove("/").await.unwrap_err(),
        FsError::InvalidPath(_)
    ));
}

#[tokio::test]
async fn test_list_file_returns_base_name() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    client.mkdir("/a").await.unwrap();
    write_file(&client, "/a/file.txt", 0, b"x").await.unwrap();
    assert_eq!(
        client.list("/a/file.txt").await.unwrap(),
        vec!["file.txt".to_string()]
    );
}

#[tokio::test]
async fn test_list_empty_dir_and_missing_path() {
    let h = Harness::new(64).await;
    let client = h.client().await;
    client.mkdir("/empty").await.unwrap();
    assert!(client.list("/empty").await.unwrap().is_empty());
    assert!(matches!(
        client.list("/ghost").await.unwrap_err(),
        FsError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_created_entries_visible_to_other_clients() {
    let h = Harness::new(64).await;
    let a = h.client().await;
    let b = h.client().await;
    a.mkdir("/shared").await.unwrap();
    write_file(&a, "/shared/f", 0, b"x").await.unwrap();
    let mut names = b.list("/shared").await.unwrap();
    names.sort();
    assert_eq!(names, vec!["f".to_string()]);
    assert_eq!(b.list("/").await.unwrap(), vec!["shared".to_string()]);
}

#[tokio::test]
async fn test_exit_closes_descriptors() {
    let h = Harness::new(64).await;
    let a = h.client().await;
    let fd = a.open("/f", true, true).await.unwrap();
    a.write(fd, 0, b"bye").await.unwrap();
    a.exit().await;
    assert!(matches!(
        a.close(fd).await.unwrap_err(),
        FsError::InvalidHandle(_)
    ));
    // exit flushed the write handle, so the contents are durable.
    let b = h.client().await;
    let out = common::read_file(&b, "/f", 0, 3).await.unwrap();
    assert_eq!(&out[..], b"bye");
}
