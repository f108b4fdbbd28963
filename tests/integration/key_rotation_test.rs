//! Key Lifecycle Integration Tests
//!
//! Registration, invalidation and rotation across the public key service,
//! including persistence through the local key store.

use kmc_config::{KeyStoreConfig, KmcConfig};
use kmc_keys::{init_key_service, KeyError, KeyService, KeySize, KeyState};
use tempfile::TempDir;

#[tokio::test]
async fn test_register_encrypt_invalidate_scenario() {
    let service = KeyService::new(KeySize::Aes128, 64 * 1024).unwrap();
    service
        .register_key(1, 7, b"0123456789abcdef")
        .await
        .unwrap();

    let ciphertext = service.encrypt(1, b"hello").unwrap();
    assert_eq!(service.decrypt(1, &ciphertext).unwrap(), b"hello");

    service.invalidate(1, 7).await.unwrap();
    assert!(matches!(
        service.encrypt(1, b"hello"),
        Err(KeyError::NoActiveKey(1))
    ));
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let service = KeyService::new(KeySize::Aes128, 64 * 1024).unwrap();
    service.register_key(1, 7, &[1u8; 16]).await.unwrap();
    let before = service.list_keys().unwrap();

    let second = service.register_key(1, 7, &[2u8; 16]).await;
    assert!(matches!(
        second,
        Err(KeyError::DuplicateKey { domain_id: 1, key_id: 7 })
    ));
    assert_eq!(service.list_keys().unwrap(), before);

    // The original material is still the one in use
    let ciphertext = service.encrypt(1, b"still key one").unwrap();
    let other = KeyService::new(KeySize::Aes128, 64 * 1024).unwrap();
    other.register_key(1, 7, &[1u8; 16]).await.unwrap();
    assert_eq!(other.decrypt(1, &ciphertext).unwrap(), b"still key one");
}

#[tokio::test]
async fn test_rotation_keeps_old_ciphertexts_readable() {
    let service = KeyService::new(KeySize::Aes256, 64 * 1024).unwrap();
    let mut ciphertexts = Vec::new();

    for key_id in 0..5 {
        service
            .register_key(3, key_id, &[key_id as u8; 32])
            .await
            .unwrap();
        ciphertexts.push((key_id, service.encrypt(3, format!("v{}", key_id).as_bytes()).unwrap()));
        if key_id > 0 {
            service.invalidate(3, key_id - 1).await.unwrap();
        }
    }

    for (key_id, ciphertext) in &ciphertexts {
        assert_eq!(
            service.decrypt(3, ciphertext).unwrap(),
            format!("v{}", key_id).as_bytes()
        );
    }

    let keys = service.list_keys().unwrap();
    let active: Vec<_> = keys.iter().filter(|k| k.state == KeyState::Active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].key_id, 4);
    assert!(active[0].is_current);
}

#[tokio::test]
async fn test_domains_are_isolated() {
    let service = KeyService::new(KeySize::Aes128, 64 * 1024).unwrap();
    service.register_key(1, 1, &[1u8; 16]).await.unwrap();
    service.register_key(2, 1, &[2u8; 16]).await.unwrap();

    let for_one = service.encrypt(1, b"domain one").unwrap();
    assert!(matches!(
        service.decrypt(2, &for_one),
        Err(KeyError::InvalidParam(_))
    ));

    service.invalidate(1, 1).await.unwrap();
    assert!(service.encrypt(2, b"domain two").is_ok());
    assert!(matches!(service.encrypt(3, b"none"), Err(KeyError::NoActiveKey(3))));
}

#[tokio::test]
async fn test_persistent_rotation_across_restarts() {
    let dir = TempDir::new().unwrap();
    let config = KmcConfig {
        key_store: Some(KeyStoreConfig {
            path: dir.path().join("keys"),
            master_key: Some("integration master".to_string()),
        }),
        ..KmcConfig::in_memory(16)
    };

    let old_ciphertext = {
        let service = init_key_service(&config).await.unwrap();
        service.register_key(1, 7, &[7u8; 16]).await.unwrap();
        let ciphertext = service.encrypt(1, b"persisted").unwrap();
        service.invalidate(1, 7).await.unwrap();
        ciphertext
    };

    let service = init_key_service(&config).await.unwrap();
    assert!(matches!(service.encrypt(1, b"x"), Err(KeyError::NoActiveKey(1))));
    assert_eq!(service.decrypt(1, &old_ciphertext).unwrap(), b"persisted");

    service.register_key(1, 8, &[8u8; 16]).await.unwrap();
    drop(service);

    let service = init_key_service(&config).await.unwrap();
    let metadata = service.get_metadata(1, 8).unwrap();
    assert!(metadata.is_current);
    assert_eq!(metadata.state, KeyState::Active);
}
