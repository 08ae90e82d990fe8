//! End-to-end tests against a real SFTP server.
//!
//! All tests here are `#[ignore]`d so they don't run in a normal
//! `cargo test`; run them with `cargo test -- --ignored` after exporting:
//!
//! ```text
//! SFTPIO_TEST_HOST=127.0.0.1:22
//! SFTPIO_TEST_USER=testuser
//! SFTPIO_TEST_PASS=testpass
//! SFTPIO_TEST_DIR=/tmp/sftpio-tests   # writable directory on the server
//! ```

use std::io::{Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread;

use sftpio::{OpenMode, Overwrite, Session, SftpChannel};

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set for server tests"))
}

fn connect() -> (Session, SftpChannel, PathBuf) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let tcp = TcpStream::connect(env("SFTPIO_TEST_HOST")).expect("tcp connect");
    let session = Session::connect(tcp, "test run finished").expect("handshake");
    let authenticated = session
        .authenticate_by_password(&env("SFTPIO_TEST_USER"), &env("SFTPIO_TEST_PASS"))
        .expect("auth call");
    assert!(authenticated, "test credentials were rejected");

    let sftp = session.sftp().expect("sftp channel");
    let dir = PathBuf::from(env("SFTPIO_TEST_DIR"));
    sftp.create_directory(&dir).expect("create test dir");
    (session, sftp, dir)
}

#[test]
#[ignore]
fn write_only_truncates_an_existing_file() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("truncate.txt");

    sftp.open_write(&path, OpenMode::new())
        .expect("create")
        .write_all(b"0123456789")
        .expect("seed");
    let mut file = sftp.open_write(&path, OpenMode::new()).expect("reopen");
    file.write_all(b"ab").expect("overwrite");
    file.close().expect("close");

    assert_eq!(sftp.metadata(&path).expect("stat").size, Some(2));
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn append_extends_instead_of_truncating() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("append.txt");

    sftp.open_write(&path, OpenMode::new())
        .expect("create")
        .write_all(b"head-")
        .expect("seed");
    sftp.open_write(&path, OpenMode::new().append(true))
        .expect("reopen append")
        .write_all(b"tail")
        .expect("append");

    let mut contents = String::new();
    sftp.open_read(&path)
        .expect("open read")
        .read_to_string(&mut contents)
        .expect("read");
    assert_eq!(contents, "head-tail");
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn no_create_fails_on_a_missing_file() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("does-not-exist.txt");

    let err = sftp
        .open_write(&path, OpenMode::new().no_create(true))
        .expect_err("open must fail");
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[test]
#[ignore]
fn no_replace_fails_on_an_existing_file() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("exclusive.txt");

    sftp.open_write(&path, OpenMode::new())
        .expect("create")
        .write_all(b"x")
        .expect("seed");
    let err = sftp
        .open_write(&path, OpenMode::new().no_replace(true))
        .expect_err("exclusive open must fail");
    assert!(err.is_already_exists(), "unexpected error: {err}");
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn read_write_preserves_contents_until_written() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("readwrite.txt");

    sftp.open_write(&path, OpenMode::new())
        .expect("create")
        .write_all(b"abcdefgh")
        .expect("seed");

    let mut file = sftp.open(&path, OpenMode::new()).expect("open rw");
    let mut head = [0u8; 2];
    file.read_exact(&mut head).expect("read head");
    assert_eq!(&head, b"ab");
    file.write_all(b"XY").expect("overwrite middle");
    drop(file);

    let mut contents = String::new();
    sftp.open_read(&path)
        .expect("reopen")
        .read_to_string(&mut contents)
        .expect("read");
    assert_eq!(contents, "abXYefgh");
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn large_transfer_round_trips_fully() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("large.bin");
    let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();

    let mut file = sftp.open_write(&path, OpenMode::new()).expect("create");
    file.write_all(&payload).expect("write");
    file.close().expect("close");

    let mut file = sftp.open_read(&path).expect("open read");
    let mut back = vec![0u8; payload.len()];
    // The loop guarantee: a read is only short at end-of-file.
    let n = file.read(&mut back).expect("read");
    assert_eq!(n, payload.len());
    assert_eq!(back, payload);
    assert_eq!(file.read(&mut [0u8; 16]).expect("eof read"), 0);
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn seek_from_end_reads_the_tail() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("seek.txt");

    sftp.open_write(&path, OpenMode::new())
        .expect("create")
        .write_all(b"0123456789")
        .expect("seed");

    let mut file = sftp.open_read(&path).expect("open read");
    assert_eq!(file.seek(SeekFrom::End(-3)).expect("seek"), 7);
    let mut tail = String::new();
    file.read_to_string(&mut tail).expect("read tail");
    assert_eq!(tail, "789");
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn write_past_end_zero_fills_the_gap() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("sparse.bin");

    let mut file = sftp.open_write(&path, OpenMode::new()).expect("create");
    file.seek(SeekFrom::Start(5)).expect("seek past end");
    file.write_all(b"Z").expect("write");
    file.close().expect("close");

    let mut back = Vec::new();
    sftp.open_read(&path)
        .expect("reopen")
        .read_to_end(&mut back)
        .expect("read");
    assert_eq!(back, [0, 0, 0, 0, 0, b'Z']);
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn reads_past_eof_yield_zero_bytes() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("short.txt");

    sftp.open_write(&path, OpenMode::new())
        .expect("create")
        .write_all(b"xy")
        .expect("seed");

    let mut file = sftp.open_read(&path).expect("open");
    file.seek(SeekFrom::Start(100)).expect("seek past end");
    assert_eq!(file.read(&mut [0u8; 8]).expect("read"), 0);
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn two_threads_interleave_on_one_connection() {
    let (_session, sftp, dir) = connect();
    let read_path = dir.join("interleave-read.bin");
    let write_path = dir.join("interleave-write.bin");
    let payload: Vec<u8> = (0..500_000u32).map(|i| (i % 253) as u8).collect();

    let mut file = sftp.open_write(&read_path, OpenMode::new()).expect("seed");
    file.write_all(&payload).expect("seed write");
    file.close().expect("seed close");

    let writer_sftp = sftp.clone();
    let writer_payload = payload.clone();
    let writer = thread::spawn(move || {
        let mut file = writer_sftp
            .open_write(&write_path, OpenMode::new())
            .expect("open writer");
        file.write_all(&writer_payload).expect("write");
        // Closing is a connection-touching call too; doing it while the
        // other thread is mid-read exercises the lock on the close path.
        file.close().expect("close");
        write_path
    });

    let mut file = sftp.open_read(&read_path).expect("open reader");
    let mut back = vec![0u8; payload.len()];
    file.read_exact(&mut back).expect("read");
    assert_eq!(back, payload);

    let write_path = writer.join().expect("writer thread panicked");
    assert_eq!(
        sftp.metadata(&write_path).expect("stat").size,
        Some(payload.len() as u64)
    );
    sftp.remove(&read_path).expect("cleanup");
    sftp.remove(&write_path).expect("cleanup");
}

#[test]
#[ignore]
fn buffered_stream_round_trips() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("buffered.txt");

    let mut stream = sftp
        .open_stream(&path, OpenMode::new().truncate(true), 4096)
        .expect("open stream");
    for chunk in ["many ", "small ", "writes"] {
        stream.write_all(chunk.as_bytes()).expect("write");
    }
    stream.seek(SeekFrom::Start(0)).expect("rewind");
    let mut contents = String::new();
    stream.read_to_string(&mut contents).expect("read back");
    assert_eq!(contents, "many small writes");
    stream.close().expect("close");
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn directory_listing_reports_created_entries() {
    let (_session, sftp, dir) = connect();
    let listing_dir = dir.join("listing");
    sftp.create_directory(&listing_dir).expect("mkdir");
    for name in ["a.txt", "b.txt"] {
        sftp.open_write(&listing_dir.join(name), OpenMode::new())
            .expect("create")
            .write_all(b"x")
            .expect("write");
    }

    let mut names: Vec<String> = sftp
        .read_dir(&listing_dir)
        .expect("read_dir")
        .map(|entry| entry.expect("entry").name)
        .collect();
    names.sort();
    assert_eq!(names, ["a.txt", "b.txt"]);

    assert_eq!(sftp.remove_all(&listing_dir).expect("remove_all"), 3);
    assert!(!sftp.exists(&listing_dir).expect("exists"));
}

#[test]
#[ignore]
fn symlinks_round_trip_through_read_link_and_canonicalize() {
    let (_session, sftp, dir) = connect();
    let target = dir.join("link-target.txt");
    let link = dir.join("link.txt");

    sftp.open_write(&target, OpenMode::new())
        .expect("create target")
        .write_all(b"through the link")
        .expect("write");
    sftp.create_symlink(&link, &target).expect("create symlink");

    // The link must appear at `link`, not at `target`.
    assert!(sftp.symlink_metadata(&link).expect("lstat link").is_symlink());
    assert!(sftp.symlink_metadata(&target).expect("lstat target").is_file());
    assert_eq!(sftp.read_link(&link).expect("read_link"), target);
    assert_eq!(
        sftp.canonicalize(&link).expect("canonicalize link"),
        sftp.canonicalize(&target).expect("canonicalize target")
    );

    let mut contents = String::new();
    sftp.open_read(&link)
        .expect("open through link")
        .read_to_string(&mut contents)
        .expect("read");
    assert_eq!(contents, "through the link");

    sftp.remove(&link).expect("cleanup link");
    assert!(sftp.exists(&target).expect("target survives link removal"));
    sftp.remove(&target).expect("cleanup target");
}

#[test]
#[ignore]
fn create_directory_reports_existing_directories() {
    let (_session, sftp, dir) = connect();
    let path = dir.join("mkdir-twice");
    assert!(sftp.create_directory(&path).expect("first mkdir"));
    assert!(!sftp.create_directory(&path).expect("second mkdir"));
    sftp.remove(&path).expect("cleanup");
}

#[test]
#[ignore]
fn rename_respects_the_overwrite_policy() {
    let (_session, sftp, dir) = connect();
    let from = dir.join("rename-from.txt");
    let to = dir.join("rename-to.txt");

    for path in [&from, &to] {
        sftp.open_write(path, OpenMode::new())
            .expect("create")
            .write_all(b"x")
            .expect("write");
    }

    assert!(sftp.rename(&from, &to, Overwrite::Prevent).is_err());
    sftp.rename(&from, &to, Overwrite::Allow).expect("rename");
    assert!(!sftp.exists(&from).expect("exists"));
    sftp.remove(&to).expect("cleanup");
}
