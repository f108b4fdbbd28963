//! Concurrency Tests for the Key Service
//!
//! Many threads and tasks encrypting against shared domains while keys are
//! registered and invalidated.
//!
//! Run with: cargo test --test concurrency_test --release

use kmc_keys::{KeyError, KeyService, KeySize};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const DOMAINS: i32 = 4;

async fn service_with_domains() -> Arc<KeyService> {
    let service = KeyService::new(KeySize::Aes128, 64 * 1024).unwrap();
    for domain in 0..DOMAINS {
        service
            .register_key(domain, 0, &[domain as u8 + 1; 16])
            .await
            .unwrap();
    }
    Arc::new(service)
}

#[tokio::test]
async fn test_concurrent_encrypt_same_domain_threads() {
    let service = service_with_domains().await;
    let start = Instant::now();

    let handles: Vec<_> = (0..16)
        .map(|t| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                for i in 0..200 {
                    let message = format!("thread {} message {}", t, i);
                    let ciphertext = service.encrypt(0, message.as_bytes()).unwrap();
                    assert_eq!(service.decrypt(0, &ciphertext).unwrap(), message.as_bytes());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    println!("✅ 3200 encrypt/decrypt pairs in {:?}", start.elapsed());
}

#[tokio::test]
async fn test_no_cross_domain_key_leakage() {
    let service = service_with_domains().await;

    let handles: Vec<_> = (0..DOMAINS)
        .map(|domain| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let mut produced = Vec::new();
                for i in 0..100 {
                    let ciphertext = service.encrypt(domain, &[i as u8; 64]).unwrap();
                    produced.push(ciphertext);
                }
                (domain, produced)
            })
        })
        .collect();

    for handle in handles {
        let (domain, produced) = handle.join().unwrap();
        for (i, ciphertext) in produced.iter().enumerate() {
            assert_eq!(service.decrypt(domain, ciphertext).unwrap(), vec![i as u8; 64]);
            let other = (domain + 1) % DOMAINS;
            assert!(matches!(
                service.decrypt(other, ciphertext),
                Err(KeyError::InvalidParam(_))
            ));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotation_while_encrypting() {
    let service = service_with_domains().await;

    let readers: Vec<_> = (0..8)
        .map(|t| {
            let service = Arc::clone(&service);
            tokio::task::spawn_blocking(move || {
                let mut ok = 0usize;
                for i in 0..500 {
                    let message = format!("{}:{}", t, i);
                    match service.encrypt(1, message.as_bytes()) {
                        Ok(ciphertext) => {
                            // Decrypt must work even if the key was rotated meanwhile
                            assert_eq!(
                                service.decrypt(1, &ciphertext).unwrap(),
                                message.as_bytes()
                            );
                            ok += 1;
                        }
                        // Window between invalidating and registering
                        Err(KeyError::NoActiveKey(1)) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                ok
            })
        })
        .collect();

    for key_id in 1..50 {
        service.invalidate(1, key_id - 1).await.unwrap();
        service
            .register_key(1, key_id, &[key_id as u8; 16])
            .await
            .unwrap();
    }

    let results = futures::future::join_all(readers).await;
    let total: usize = results.into_iter().map(|r| r.unwrap()).sum();
    assert!(total > 0);

    assert_eq!(service.list_keys().unwrap().len(), (DOMAINS as usize) + 49);
    assert_eq!(service.registry().current_key(1).unwrap().key_id, 49);
}
