#[cfg(test)]
mod transaction_tests {
    use crate::crypto::PrivateKey;
    use crate::test_helpers::test_address;
    use crate::types::{create_signed, Transaction, TransactionOutput};
    use crate::util::Amount;
    use chrono::Utc;

    #[test]
    fn test_coinbase_shape() {
        let tx = Transaction::coinbase(test_address(), Amount::from_coins(50), Utc::now());
        assert!(tx.is_coinbase());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.total_output(), Some(Amount::from_coins(50)));
    }

    #[test]
    fn test_transaction_id_is_deterministic() {
        let tx = Transaction::coinbase(test_address(), Amount::from_coins(50), Utc::now());
        assert_eq!(tx.id(), tx.id());
    }

    #[test]
    fn test_transaction_id_survives_wire_round_trip() {
        // Equal transactions must hash to the same id on every node
        let key = PrivateKey::new_key();
        let tx = create_signed(
            &[(crate::crypto::Hash::double_sha256(b"prev"), 0)],
            vec![TransactionOutput {
                amount: Amount::from_coins(25),
                recipient_address: test_address(),
            }],
            &key,
        );
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx.id(), back.id());
        assert_eq!(tx, back);
    }

    #[test]
    fn test_different_transactions_different_ids() {
        let tx1 = Transaction::coinbase(test_address(), Amount::from_coins(50), Utc::now());
        let tx2 = Transaction::coinbase(test_address(), Amount::from_coins(50), Utc::now());
        // Different recipients make different ids
        assert_ne!(tx1.id(), tx2.id());
    }

    #[test]
    fn test_canonical_json_has_sorted_keys() {
        let tx = Transaction::coinbase(test_address(), Amount::from_coins(50), Utc::now());
        let canonical = tx.canonical_json();
        let inputs_at = canonical.find("\"inputs\"").unwrap();
        let outputs_at = canonical.find("\"outputs\"").unwrap();
        let timestamp_at = canonical.find("\"timestamp\"").unwrap();
        assert!(inputs_at < outputs_at && outputs_at < timestamp_at);
    }

    #[test]
    fn test_signing_hash_excludes_signatures() {
        let key = PrivateKey::new_key();
        let outpoint = (crate::crypto::Hash::double_sha256(b"prev"), 0u32);
        let outputs = vec![TransactionOutput {
            amount: Amount::from_coins(1),
            recipient_address: test_address(),
        }];
        let tx = create_signed(&[outpoint], outputs, &key);
        // Every input signature verifies against the stripped payload
        let message = tx.signing_hash();
        for input in &tx.inputs {
            assert!(input.signature.verify(&message, &input.pubkey));
        }
    }
}

#[cfg(test)]
mod block_tests {
    use crate::genesis;
    use crate::test_helpers::{mine_block, test_address, test_consensus};
    use crate::types::Chain;

    #[test]
    fn test_genesis_is_stable() {
        let g1 = genesis::genesis_block();
        let g2 = genesis::genesis_block();
        assert_eq!(g1.hash(), g2.hash());
        assert_eq!(g1.header.index, 0);
        assert_eq!(g1.header.target_difficulty, genesis::GENESIS_DIFFICULTY);
        assert!(g1.coinbase().is_some());
    }

    #[test]
    fn test_block_hash_commits_to_nonce() {
        let cfg = test_consensus();
        let (chain, utxo) = Chain::bootstrap();
        let mut block = mine_block(&chain, &utxo, &cfg, &test_address(), vec![]);
        let original = block.hash();
        block.header.nonce = block.header.nonce.wrapping_add(1);
        assert_ne!(block.hash(), original);
    }

    #[test]
    fn test_mined_block_meets_target() {
        let cfg = test_consensus();
        let (chain, utxo) = Chain::bootstrap();
        let block = mine_block(&chain, &utxo, &cfg, &test_address(), vec![]);
        assert!(block.hash().matches_target(block.header.target()));
    }

    #[test]
    fn test_miner_address_is_coinbase_recipient() {
        let cfg = test_consensus();
        let (chain, utxo) = Chain::bootstrap();
        let miner = test_address();
        let block = mine_block(&chain, &utxo, &cfg, &miner, vec![]);
        assert_eq!(block.miner_address(), Some(&miner));
    }
}

#[cfg(test)]
mod utxo_tests {
    use crate::test_helpers::{extend_chain, test_consensus};
    use crate::types::{Chain, OutPoint, UtxoIndex};
    use crate::crypto::PrivateKey;
    use crate::util::Amount;

    #[test]
    fn test_genesis_bootstrap_creates_utxo() {
        let (_, utxo) = Chain::bootstrap();
        assert_eq!(utxo.len(), 1);
    }

    #[test]
    fn test_snapshot_is_frozen_during_writes() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let snapshot = utxo.snapshot();
        let before = snapshot.len();

        let miner = PrivateKey::new_key().public_key().address();
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 2);

        // The live index moved on; the held snapshot did not
        assert_eq!(snapshot.len(), before);
        assert_eq!(utxo.len(), before + 2);
    }

    #[test]
    fn test_balance_tracks_mined_coinbases() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner = PrivateKey::new_key().public_key().address();
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 3);

        let snapshot = utxo.snapshot();
        assert_eq!(snapshot.balance_of(&miner), Amount::from_coins(150));
        assert_eq!(snapshot.utxos_for(&miner).len(), 3);
    }

    #[test]
    fn test_rebuild_matches_incremental_application() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner = PrivateKey::new_key().public_key().address();
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 3);

        let rebuilt = UtxoIndex::rebuild(chain.blocks().map(|b| &**b));
        assert_eq!(rebuilt.len(), utxo.len());
        let live = utxo.snapshot();
        for (outpoint, value) in rebuilt.snapshot().iter() {
            assert_eq!(live.get(outpoint), Some(value));
        }
    }

    #[test]
    fn test_apply_block_reports_delta() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner = PrivateKey::new_key().public_key().address();
        let block = crate::test_helpers::mine_block(&chain, &utxo, &cfg, &miner, vec![]);
        let coinbase_id = block.transactions[0].id();

        let delta = chain.append(block, &mut utxo, &cfg).unwrap();
        assert!(delta.spent.is_empty());
        assert_eq!(delta.created.len(), 1);
        assert_eq!(delta.created[0].0, OutPoint::new(coinbase_id, 0));
    }
}

#[cfg(test)]
mod mempool_tests {
    use crate::crypto::{Hash, PrivateKey};
    use crate::test_helpers::test_address;
    use crate::types::{create_signed, Mempool, Transaction, TransactionOutput};
    use crate::util::Amount;
    use chrono::Utc;

    fn spending_tx(prev: &[u8], key: &PrivateKey, coins: u64) -> Transaction {
        create_signed(
            &[(Hash::double_sha256(prev), 0)],
            vec![TransactionOutput {
                amount: Amount::from_coins(coins),
                recipient_address: test_address(),
            }],
            key,
        )
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let mut pool = Mempool::new(100, 1 << 20);
        let key = PrivateKey::new_key();
        let tx = spending_tx(b"a", &key, 1);
        pool.insert(tx.clone(), Amount::from_units(100)).unwrap();
        assert!(pool.insert(tx, Amount::from_units(100)).is_err());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_conflicting_spend_rejected_later_arrival_loses() {
        let mut pool = Mempool::new(100, 1 << 20);
        let key = PrivateKey::new_key();
        // Two distinct transactions spending the same outpoint
        let tx1 = spending_tx(b"same", &key, 1);
        let tx2 = spending_tx(b"same", &key, 2);

        pool.insert(tx1, Amount::from_units(100)).unwrap();
        let err = pool.insert(tx2, Amount::from_units(900)).unwrap_err();
        assert_eq!(err.code(), "double_spend");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_capacity_rejects_with_retry_later() {
        let mut pool = Mempool::new(2, 1 << 20);
        let key = PrivateKey::new_key();
        pool.insert(spending_tx(b"a", &key, 1), Amount::ZERO).unwrap();
        pool.insert(spending_tx(b"b", &key, 1), Amount::ZERO).unwrap();
        let err = pool
            .insert(spending_tx(b"c", &key, 1), Amount::ZERO)
            .unwrap_err();
        assert_eq!(err.code(), "mempool_full");
        assert!(err.is_retry_later());
    }

    #[test]
    fn test_remove_confirmed_releases_outpoints() {
        let mut pool = Mempool::new(100, 1 << 20);
        let key = PrivateKey::new_key();
        let tx1 = spending_tx(b"same", &key, 1);
        let tx1_id = pool.insert(tx1, Amount::from_units(100)).unwrap();
        pool.remove_confirmed(&[tx1_id]);

        // The outpoint is free again
        let tx2 = spending_tx(b"same", &key, 2);
        assert!(pool.insert(tx2, Amount::from_units(100)).is_ok());
    }

    #[test]
    fn test_drain_orders_by_fee_rate() {
        let mut pool = Mempool::new(100, 1 << 20);
        let key = PrivateKey::new_key();
        let low = pool
            .insert(spending_tx(b"low", &key, 1), Amount::from_units(100))
            .unwrap();
        let high = pool
            .insert(spending_tx(b"high", &key, 1), Amount::from_units(9_000))
            .unwrap();
        let mid = pool
            .insert(spending_tx(b"mid", &key, 1), Amount::from_units(3_000))
            .unwrap();

        let picked = pool.drain_prioritized(10, 1 << 20);
        let order: Vec<_> = picked.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(order, vec![high, mid, low]);
        // Selection does not remove entries
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_drain_equal_fees_break_by_admission_order() {
        let mut pool = Mempool::new(100, 1 << 20);
        let key = PrivateKey::new_key();
        // Same recipient and amount so both transactions have identical
        // byte size, making the fee rates exactly equal
        let outputs = vec![TransactionOutput {
            amount: Amount::from_coins(1),
            recipient_address: test_address(),
        }];
        let tx_a = create_signed(&[(Hash::double_sha256(b"first"), 0)], outputs.clone(), &key);
        let tx_b = create_signed(&[(Hash::double_sha256(b"second"), 0)], outputs, &key);
        assert_eq!(tx_a.byte_size(), tx_b.byte_size());

        let first = pool.insert(tx_a, Amount::from_units(500)).unwrap();
        let second = pool.insert(tx_b, Amount::from_units(500)).unwrap();

        let picked = pool.drain_prioritized(10, 1 << 20);
        let order: Vec<_> = picked.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(order, vec![first, second]);
    }

    #[test]
    fn test_drain_respects_count_limit() {
        let mut pool = Mempool::new(100, 1 << 20);
        let key = PrivateKey::new_key();
        for name in [&b"a"[..], b"b", b"c", b"d"] {
            pool.insert(spending_tx(name, &key, 1), Amount::from_units(100))
                .unwrap();
        }
        assert_eq!(pool.drain_prioritized(2, 1 << 20).len(), 2);
    }

    #[test]
    fn test_coinbase_cannot_conflict() {
        // Coinbase-shaped transactions have no inputs to reserve
        let mut pool = Mempool::new(100, 1 << 20);
        let tx = Transaction::coinbase(test_address(), Amount::from_coins(1), Utc::now());
        assert!(pool.insert(tx, Amount::ZERO).is_ok());
        assert!(pool.shadow().is_empty());
    }
}

#[cfg(test)]
mod chain_tests {
    use crate::crypto::PrivateKey;
    use crate::error::ChainError;
    use crate::test_helpers::{extend_chain, mine_block, test_address, test_consensus};
    use crate::types::{create_signed, Chain, TransactionOutput};
    use crate::util::Amount;

    fn remine(block: &mut crate::types::Block) {
        let target = block.header.target();
        block.header.nonce = 0;
        while !block.hash().matches_target(target) {
            block.header.nonce += 1;
        }
    }

    #[test]
    fn test_append_advances_tip() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner = test_address();
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 2);

        assert_eq!(chain.height(), 2);
        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.tip().header.previous_hash,
            chain.get(1).unwrap().hash()
        );
    }

    #[test]
    fn test_append_rejects_wrong_prev_hash() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let mut block = mine_block(&chain, &utxo, &cfg, &test_address(), vec![]);
        block.header.previous_hash = crate::crypto::Hash::double_sha256(b"elsewhere");
        remine(&mut block);

        let err = chain.append(block, &mut utxo, &cfg).unwrap_err();
        assert_eq!(err.code(), "bad_prev_hash");
    }

    #[test]
    fn test_append_rejects_stale_index() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner = test_address();
        // Two competing blocks on the same parent; the second arrives late
        let rival = mine_block(&chain, &utxo, &cfg, &miner, vec![]);
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 1);

        let err = chain.append(rival, &mut utxo, &cfg).unwrap_err();
        assert_eq!(err.code(), "bad_index");
    }

    #[test]
    fn test_append_rejects_tampered_merkle_root() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let mut block = mine_block(&chain, &utxo, &cfg, &test_address(), vec![]);
        block.header.merkle_root =
            crate::util::MerkleRoot::calculate(&[]);
        remine(&mut block);

        let err = chain.append(block, &mut utxo, &cfg).unwrap_err();
        assert_eq!(err.code(), "bad_merkle");
    }

    #[test]
    fn test_append_rejects_wrong_coinbase_sum() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let mut block = mine_block(&chain, &utxo, &cfg, &test_address(), vec![]);
        block.transactions[0].outputs[0].amount = cfg
            .block_reward
            .checked_add(Amount::from_units(1))
            .unwrap();
        block.header.merkle_root = crate::util::MerkleRoot::calculate(&block.transactions);
        remine(&mut block);

        let err = chain.append(block, &mut utxo, &cfg).unwrap_err();
        assert_eq!(err.code(), "bad_coinbase");
    }

    #[test]
    fn test_append_rejects_unmined_block() {
        let cfg = crate::config::ConsensusConfig {
            // High enough that an unmined header virtually never passes
            difficulty: 32,
            min_difficulty: 1,
            max_difficulty: 64,
            adjustment_enabled: false,
            ..test_consensus()
        };
        let (mut chain, mut utxo) = Chain::bootstrap();
        let tip = chain.tip().clone();
        let miner = test_address();
        let timestamp = chrono::Utc::now();
        let coinbase =
            crate::types::Transaction::coinbase(miner, cfg.block_reward, timestamp);
        let block = crate::types::Block::new(
            crate::types::BlockHeader::new(
                tip.header.index + 1,
                tip.hash(),
                crate::util::MerkleRoot::calculate(std::slice::from_ref(&coinbase)),
                timestamp,
                0,
                32,
            ),
            vec![coinbase],
        );

        let err = chain.append(block, &mut utxo, &cfg).unwrap_err();
        assert_eq!(err.code(), "bad_pow");
    }

    #[test]
    fn test_spend_and_confirm() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner_key = PrivateKey::new_key();
        let miner = miner_key.public_key().address();
        let alice = test_address();
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 1);

        // Spend the freshly mined coinbase: 25 to alice, 24.9 change, 0.1 fee
        let coinbase_id = chain.tip().transactions[0].id();
        let tx = create_signed(
            &[(coinbase_id, 0)],
            vec![
                TransactionOutput {
                    amount: Amount::parse("25").unwrap(),
                    recipient_address: alice.clone(),
                },
                TransactionOutput {
                    amount: Amount::parse("24.9").unwrap(),
                    recipient_address: miner.clone(),
                },
            ],
            &miner_key,
        );
        let block = mine_block(&chain, &utxo, &cfg, &miner, vec![tx.clone()]);
        chain.append(block, &mut utxo, &cfg).unwrap();

        let snapshot = utxo.snapshot();
        assert_eq!(snapshot.balance_of(&alice), Amount::from_coins(25));
        // change 24.9 plus the new coinbase 50 + 0.1 fee
        assert_eq!(snapshot.balance_of(&miner), Amount::parse("75").unwrap());
        assert!(chain.contains_transaction(&tx.id()));
    }

    #[test]
    fn test_intra_block_chained_spend_is_valid() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner_key = PrivateKey::new_key();
        let miner = miner_key.public_key().address();
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 1);

        let bob_key = PrivateKey::new_key();
        let bob = bob_key.public_key().address();
        let carol = test_address();

        // tx1 spends the coinbase to bob; tx2 spends tx1's output, in the
        // same block
        let coinbase_id = chain.tip().transactions[0].id();
        let tx1 = create_signed(
            &[(coinbase_id, 0)],
            vec![TransactionOutput {
                amount: Amount::from_coins(50),
                recipient_address: bob.clone(),
            }],
            &miner_key,
        );
        let tx2 = create_signed(
            &[(tx1.id(), 0)],
            vec![TransactionOutput {
                amount: Amount::from_coins(50),
                recipient_address: carol.clone(),
            }],
            &bob_key,
        );

        // Build the block by hand: the helper's fee scan only reads the
        // snapshot, which cannot see tx1's output yet
        let tip = chain.tip().clone();
        let timestamp = chrono::Utc::now();
        let coinbase = crate::types::Transaction::coinbase(miner, cfg.block_reward, timestamp);
        let transactions = vec![coinbase, tx1, tx2];
        let mut block = crate::types::Block::new(
            crate::types::BlockHeader::new(
                tip.header.index + 1,
                tip.hash(),
                crate::util::MerkleRoot::calculate(&transactions),
                timestamp,
                0,
                crate::difficulty::expected_difficulty(&chain, &cfg),
            ),
            transactions,
        );
        let target = block.header.target();
        while !block.hash().matches_target(target) {
            block.header.nonce += 1;
        }

        chain.append(block, &mut utxo, &cfg).unwrap();
        assert_eq!(utxo.snapshot().balance_of(&carol), Amount::from_coins(50));
        assert_eq!(utxo.snapshot().balance_of(&bob), Amount::ZERO);
    }

    #[test]
    fn test_in_block_double_spend_rejected() {
        let cfg = test_consensus();
        let (mut chain, mut utxo) = Chain::bootstrap();
        let miner_key = PrivateKey::new_key();
        let miner = miner_key.public_key().address();
        extend_chain(&mut chain, &mut utxo, &cfg, &miner, 1);

        let coinbase_id = chain.tip().transactions[0].id();
        let spend = |coins: u64| {
            create_signed(
                &[(coinbase_id, 0)],
                vec![TransactionOutput {
                    amount: Amount::from_coins(coins),
                    recipient_address: test_address(),
                }],
                &miner_key,
            )
        };
        let block = mine_block(&chain, &utxo, &cfg, &miner, vec![spend(50), spend(49)]);

        let err = chain.append(block, &mut utxo, &cfg).unwrap_err();
        match err {
            ChainError::TxInvalid(inner) => assert_eq!(inner.code(), "double_spend"),
            other => panic!("expected tx_invalid, got {other:?}"),
        }
    }
}

#[cfg(test)]
mod fork_tests {
    use crate::test_helpers::{extend_chain, test_address, test_consensus};
    use crate::types::{Chain, OrphanPool, UtxoIndex};
    use crate::util::Amount;

    /// Two chains grown independently from the same genesis.
    fn competing_chains(
        short_len: usize,
        long_len: usize,
    ) -> (Chain, UtxoIndex, Chain, crate::crypto::Address) {
        let cfg = test_consensus();
        let (mut main, mut main_utxo) = Chain::bootstrap();
        let local_miner = test_address();
        extend_chain(&mut main, &mut main_utxo, &cfg, &local_miner, short_len);

        let (mut rival, mut rival_utxo) = Chain::bootstrap();
        let rival_miner = test_address();
        extend_chain(&mut rival, &mut rival_utxo, &cfg, &rival_miner, long_len);

        (main, main_utxo, rival, rival_miner)
    }

    #[test]
    fn test_orphans_assemble_into_candidate() {
        let cfg = test_consensus();
        let (main, _, rival, _) = competing_chains(2, 3);

        let mut orphans = OrphanPool::new(crate::ORPHAN_CACHE_CAPACITY);
        let rival_blocks: Vec<_> = rival.blocks().skip(1).map(|b| (**b).clone()).collect();
        for block in &rival_blocks {
            orphans.insert(block.clone());
        }

        let head = rival_blocks.last().unwrap().clone();
        let candidate = orphans.assemble_candidate(&head, &main).unwrap();
        assert_eq!(candidate.len(), rival.len());

        let (rebuilt, _) = Chain::validate_candidate(candidate, &cfg).unwrap();
        assert_eq!(rebuilt.tip().hash(), rival.tip().hash());
    }

    #[test]
    fn test_heavier_candidate_replaces() {
        let (mut main, _, rival, rival_miner) = competing_chains(2, 3);
        assert!(rival.cumulative_work() > main.cumulative_work());

        assert!(main.replace(rival));
        assert_eq!(main.height(), 3);

        // Rebuilt UTXOs reflect only the surviving chain
        let utxo = UtxoIndex::rebuild(main.blocks().map(|b| &**b));
        assert_eq!(
            utxo.snapshot().balance_of(&rival_miner),
            Amount::from_coins(150)
        );
    }

    #[test]
    fn test_equal_work_keeps_incumbent() {
        let (mut main, _, rival, _) = competing_chains(2, 2);
        let tip_before = main.tip().hash();
        assert!(!main.replace(rival));
        assert_eq!(main.tip().hash(), tip_before);
    }

    #[test]
    fn test_candidate_with_foreign_genesis_rejected() {
        let cfg = test_consensus();
        let (_, _, rival, _) = competing_chains(1, 2);
        let mut blocks = rival.to_blocks();
        // Drop the genesis: the candidate no longer starts at block 0
        blocks.remove(0);
        assert!(Chain::validate_candidate(blocks, &cfg).is_err());
    }

    #[test]
    fn test_orphan_pool_lru_eviction() {
        let cfg = test_consensus();
        let (mut donor, mut donor_utxo) = Chain::bootstrap();
        extend_chain(&mut donor, &mut donor_utxo, &cfg, &test_address(), 4);

        let mut pool = OrphanPool::new(3);
        let blocks: Vec<_> = donor.blocks().skip(1).map(|b| (**b).clone()).collect();
        for block in &blocks {
            pool.insert(block.clone());
        }

        assert_eq!(pool.len(), 3);
        // The oldest entry was evicted
        assert!(!pool.contains(&blocks[0].hash()));
        assert!(pool.contains(&blocks[3].hash()));
    }
}
