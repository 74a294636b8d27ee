#[cfg(test)]
mod tests {
    use crate::crypto::Hash;
    use crate::test_helpers::test_address;
    use crate::types::{Transaction, TransactionOutput};
    use crate::util::{Amount, MerkleRoot};
    use chrono::Utc;

    fn coinbase(amount: u64) -> Transaction {
        Transaction::coinbase(test_address(), Amount::from_coins(amount), Utc::now())
    }

    #[test]
    fn test_merkle_root_single_transaction() {
        let tx = coinbase(50);
        let root = MerkleRoot::calculate(std::slice::from_ref(&tx));
        assert_eq!(root.as_hash(), tx.id());
    }

    #[test]
    fn test_merkle_root_is_deterministic() {
        let txs = vec![coinbase(50), coinbase(25), coinbase(10)];
        assert_eq!(MerkleRoot::calculate(&txs), MerkleRoot::calculate(&txs));
    }

    #[test]
    fn test_merkle_root_depends_on_order() {
        let a = coinbase(50);
        let b = coinbase(25);
        let forward = MerkleRoot::calculate(&[a.clone(), b.clone()]);
        let backward = MerkleRoot::calculate(&[b, a]);
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_merkle_root_odd_count_duplicates_last() {
        // Three leaves: the pair layer is [H(AB), H(CC)]
        let a = coinbase(1);
        let b = coinbase(2);
        let c = coinbase(3);
        let root3 = MerkleRoot::calculate(&[a.clone(), b.clone(), c.clone()]);
        let root4 = MerkleRoot::calculate(&[a, b, c.clone(), c]);
        assert_eq!(root3, root4);
    }

    #[test]
    fn test_merkle_root_empty_is_zero() {
        assert_eq!(MerkleRoot::calculate(&[]).as_hash(), Hash::zero());
    }

    #[test]
    fn test_amount_display_fixed_point() {
        assert_eq!(Amount::from_coins(50).to_string(), "50.00000000");
        assert_eq!(Amount::from_units(1).to_string(), "0.00000001");
        assert_eq!(Amount::from_units(2_510_000_000).to_string(), "25.10000000");
    }

    #[test]
    fn test_amount_parse_variants() {
        assert_eq!(Amount::parse("25").unwrap(), Amount::from_coins(25));
        assert_eq!(
            Amount::parse("25.1").unwrap(),
            Amount::from_units(2_510_000_000)
        );
        assert_eq!(
            Amount::parse("25.10000000").unwrap(),
            Amount::from_units(2_510_000_000)
        );
        assert_eq!(Amount::parse("0.00000001").unwrap(), Amount::from_units(1));
    }

    #[test]
    fn test_amount_parse_rejects_garbage() {
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("-1").is_err());
        assert!(Amount::parse("1.123456789").is_err());
        assert!(Amount::parse("abc").is_err());
        assert!(Amount::parse("1.2.3").is_err());
    }

    #[test]
    fn test_amount_wire_round_trip() {
        let amount = Amount::from_units(7_400_000_123);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"74.00000123\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }

    #[test]
    fn test_amount_checked_arithmetic() {
        let max = Amount::from_units(u64::MAX);
        assert!(max.checked_add(Amount::from_units(1)).is_none());
        assert!(Amount::ZERO.checked_sub(Amount::from_units(1)).is_none());
        assert_eq!(
            Amount::checked_sum([Amount::from_coins(1), Amount::from_coins(2)]),
            Some(Amount::from_coins(3))
        );
        assert_eq!(Amount::checked_sum([max, max]), None);
    }
}
