// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end peer lifecycle against an in-memory registry and fake driver.

use warren_control::testing::{init_default, services, FakeDriver};
use warren_control::{ControlConfig, ControlServices, InterfaceDraft, PeerDraft, SyncState};

use std::sync::Arc;

#[tokio::test]
async fn addresses_ascend_and_freed_slots_are_reused() {
	let (control, _driver) = services().await;
	init_default(&control).await;

	// 10.8.0.0 is the network address, 10.8.0.1 the interface itself.
	let a = control.peers.create(PeerDraft::new("A")).await.unwrap();
	assert_eq!(a.peer.address.to_string(), "10.8.0.2");

	let b = control.peers.create(PeerDraft::new("B")).await.unwrap();
	assert_eq!(b.peer.address.to_string(), "10.8.0.3");

	control.peers.delete(a.peer.id).await.unwrap();

	// The freed slot is the lowest again and gets reused.
	let c = control.peers.create(PeerDraft::new("C")).await.unwrap();
	assert_eq!(c.peer.address.to_string(), "10.8.0.2");

	// B kept its address and identity throughout.
	let b_again = control.peers.get(b.peer.id).await.unwrap();
	assert_eq!(b_again.address.to_string(), "10.8.0.3");
	assert_eq!(b_again.public_key, b.peer.public_key);
}

#[tokio::test]
async fn create_then_delete_restores_the_configuration_baseline() {
	let (control, driver) = services().await;
	init_default(&control).await;
	let baseline = driver.last_applied().unwrap();

	let created = control.peers.create(PeerDraft::new("ephemeral")).await.unwrap();
	assert_ne!(driver.last_applied().unwrap(), baseline);

	control.peers.delete(created.peer.id).await.unwrap();
	assert_eq!(driver.last_applied().unwrap(), baseline);
}

#[tokio::test]
async fn concurrent_creates_on_a_single_slot_pool_yield_one_winner() {
	let driver = Arc::new(FakeDriver::new());
	let pool = warren_control::testing::memory_pool().await;
	let control = ControlServices::new(pool, driver, ControlConfig::new("wg0"));

	// Hosts of 10.8.0.0/30 are .1 (interface) and .2, so one free slot.
	control
		.interface
		.initialize(InterfaceDraft::new("10.8.0.0/30".parse().unwrap()))
		.await
		.unwrap();

	let first = {
		let control = control.clone();
		tokio::spawn(async move { control.peers.create(PeerDraft::new("first")).await })
	};
	let second = {
		let control = control.clone();
		tokio::spawn(async move { control.peers.create(PeerDraft::new("second")).await })
	};

	let outcomes = [first.await.unwrap(), second.await.unwrap()];
	let winners = outcomes.iter().filter(|r| r.is_ok()).count();
	assert_eq!(winners, 1);

	let loser = outcomes
		.iter()
		.find(|r| r.is_err())
		.unwrap()
		.as_ref()
		.unwrap_err();
	assert!(matches!(
		loser,
		warren_control::ControlError::PoolExhausted | warren_control::ControlError::Conflict(_)
	));

	// Exactly one peer exists, with the single available address.
	let peers = control.peers.list().await.unwrap();
	assert_eq!(peers.len(), 1);
	assert_eq!(peers[0].address.to_string(), "10.8.0.2");
}

#[tokio::test]
async fn degraded_sync_keeps_the_peer_and_recovers_on_the_next_push() {
	let (control, driver) = services().await;
	init_default(&control).await;

	driver.fail_next_applies(2);
	let created = control.peers.create(PeerDraft::new("laptop")).await.unwrap();
	assert!(matches!(created.sync, SyncState::Degraded { .. }));

	// The next mutation re-renders the full registry state, healing the lag.
	let second = control.peers.create(PeerDraft::new("phone")).await.unwrap();
	assert_eq!(second.sync, SyncState::Synced);

	let applied = driver.last_applied().unwrap();
	assert!(applied.contains(&created.peer.public_key.to_base64()));
	assert!(applied.contains(&second.peer.public_key.to_base64()));
}

#[tokio::test]
async fn peer_config_text_matches_the_interface_settings() {
	let (control, _driver) = services().await;

	let mut draft = InterfaceDraft::new("10.8.0.0/24".parse().unwrap());
	draft.advertised_endpoint = Some("vpn.example.com:51820".to_string());
	draft.dns_servers = vec!["1.1.1.1".parse().unwrap()];
	let init = control.interface.initialize(draft).await.unwrap();

	let created = control.peers.create(PeerDraft::new("laptop")).await.unwrap();
	let text = control.peers.config_text(created.peer.id).await.unwrap();

	assert!(text.contains("Address = 10.8.0.2/32"));
	assert!(text.contains("DNS = 1.1.1.1"));
	assert!(text.contains("Endpoint = vpn.example.com:51820"));
	assert!(text.contains(&format!(
		"PublicKey = {}",
		init.settings.public_key.to_base64()
	)));
	// The peer's own private key appears here and only here.
	assert!(text.contains(created.peer.private_key.to_base64().expose()));
}

#[tokio::test]
async fn list_reflects_creation_order() {
	let (control, _driver) = services().await;
	init_default(&control).await;

	for name in ["a", "b", "c"] {
		control.peers.create(PeerDraft::new(name)).await.unwrap();
	}

	let names: Vec<String> = control
		.peers
		.list()
		.await
		.unwrap()
		.into_iter()
		.map(|p| p.name)
		.collect();
	assert_eq!(names, vec!["a", "b", "c"]);
}
