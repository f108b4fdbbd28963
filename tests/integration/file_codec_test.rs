//! File Codec Integration Tests
//!
//! Encrypts and decrypts real files through the key service.

use kmc_keys::{KeyError, KeyService, KeySize};
use rand::RngCore;
use tempfile::TempDir;
use tokio::fs;

async fn roundtrip(service: &KeyService, domain_id: i32, data: &[u8]) -> Vec<u8> {
    let dir = TempDir::new().expect("temp dir");
    let plain = dir.path().join("input.bin");
    let sealed = dir.path().join("input.bin.kmc");
    let restored = dir.path().join("output.bin");
    fs::write(&plain, data).await.unwrap();

    service.encrypt_file(domain_id, &plain, &sealed).await.unwrap();
    let sealed_bytes = fs::read(&sealed).await.unwrap();
    assert!(sealed_bytes.len() > data.len());

    service.decrypt_file(domain_id, &sealed, &restored).await.unwrap();
    fs::read(&restored).await.unwrap()
}

#[tokio::test]
async fn test_empty_one_byte_and_large_files() {
    let service = KeyService::new(KeySize::Aes128, 64 * 1024).unwrap();
    service.register_key(1, 7, &[0x17; 16]).await.unwrap();

    assert_eq!(roundtrip(&service, 1, b"").await, b"");
    assert_eq!(roundtrip(&service, 1, b"x").await, b"x");

    // Just over 1 MiB and not a multiple of the chunk size
    let mut large = vec![0u8; 1024 * 1024 + 4099];
    rand::thread_rng().fill_bytes(&mut large);
    assert_eq!(roundtrip(&service, 1, &large).await, large);
}

#[tokio::test]
async fn test_large_file_aes256_small_chunks() {
    let service = KeyService::new(KeySize::Aes256, 4096).unwrap();
    service.register_key(9, 1, &[0x91; 32]).await.unwrap();

    let large: Vec<u8> = (0..(1024 * 1024 + 1)).map(|i| (i % 253) as u8).collect();
    assert_eq!(roundtrip(&service, 9, &large).await, large);
}

#[tokio::test]
async fn test_file_decrypts_after_key_invalidated() {
    let service = KeyService::new(KeySize::Aes128, 1024).unwrap();
    service.register_key(1, 1, &[1u8; 16]).await.unwrap();

    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("report.txt");
    let sealed = dir.path().join("report.kmc");
    let restored = dir.path().join("report.out");
    fs::write(&plain, b"quarterly numbers").await.unwrap();
    service.encrypt_file(1, &plain, &sealed).await.unwrap();

    service.invalidate(1, 1).await.unwrap();
    assert!(matches!(
        service.encrypt_file(1, &plain, dir.path().join("new.kmc")).await,
        Err(KeyError::NoActiveKey(1))
    ));

    service.decrypt_file(1, &sealed, &restored).await.unwrap();
    assert_eq!(fs::read(&restored).await.unwrap(), b"quarterly numbers");
}

#[tokio::test]
async fn test_chunk_size_mismatch_between_writer_and_reader() {
    let writer = KeyService::new(KeySize::Aes128, 100).unwrap();
    writer.register_key(2, 2, &[2u8; 16]).await.unwrap();
    let reader = KeyService::new(KeySize::Aes128, 64 * 1024).unwrap();
    reader.register_key(2, 2, &[2u8; 16]).await.unwrap();

    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("plain");
    let sealed = dir.path().join("sealed");
    let restored = dir.path().join("restored");
    let data = vec![0xA5u8; 1000];
    fs::write(&plain, &data).await.unwrap();

    writer.encrypt_file(2, &plain, &sealed).await.unwrap();
    reader.decrypt_file(2, &sealed, &restored).await.unwrap();
    assert_eq!(fs::read(&restored).await.unwrap(), data);
}
