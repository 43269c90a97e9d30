//! Transaction envelope for a single contract invocation.
//!
//! Builds the `InvokeHostFunction` transaction used both for simulation and
//! for submission, splices in the resources returned by simulation and signs
//! it with the keeper's keypair.

use crate::scval::{ScAddress, ScVal, XdrError};
use crate::signer::Keypair;
use sha2::{Digest, Sha256};
use stellar_xdr::curr::{
    DecoratedSignature, Hash, HostFunction, InvokeContractArgs, InvokeHostFunctionOp, Limits,
    Memo, MuxedAccount, Operation, OperationBody, Preconditions, ScSymbol, SequenceNumber,
    Signature, SignatureHint, SorobanAuthorizationEntry, SorobanTransactionData, Transaction,
    TransactionEnvelope, TransactionExt, TransactionSignaturePayload,
    TransactionSignaturePayloadTaggedTransaction, TransactionV1Envelope, Uint256, WriteXdr,
};

/// `contract.function(args)` as a host function invocation.
pub fn contract_call(
    contract: ScAddress,
    function: &str,
    args: Vec<ScVal>,
) -> Result<InvokeContractArgs, XdrError> {
    Ok(InvokeContractArgs {
        contract_address: contract,
        function_name: ScSymbol(function.try_into()?),
        args: args.try_into()?,
    })
}

/// Unsigned transaction carrying one contract call.
#[derive(Debug, Clone)]
pub struct InvokeTransaction {
    pub source: [u8; 32],
    pub fee: u32,
    pub seq_num: i64,
    pub call: InvokeContractArgs,
    pub auth: Vec<SorobanAuthorizationEntry>,
    pub soroban_data: Option<SorobanTransactionData>,
}

impl InvokeTransaction {
    pub fn new(source: [u8; 32], fee: u32, seq_num: i64, call: InvokeContractArgs) -> Self {
        Self {
            source,
            fee,
            seq_num,
            call,
            auth: Vec::new(),
            soroban_data: None,
        }
    }

    /// Attach simulated resources; the resource fee is added to the inclusion fee.
    pub fn assemble(
        mut self,
        soroban_data: SorobanTransactionData,
        auth: Vec<SorobanAuthorizationEntry>,
        min_resource_fee: u32,
    ) -> Self {
        self.fee = self.fee.saturating_add(min_resource_fee);
        self.soroban_data = Some(soroban_data);
        self.auth = auth;
        self
    }

    pub fn transaction(&self) -> Result<Transaction, XdrError> {
        let operation = Operation {
            source_account: None,
            body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
                host_function: HostFunction::InvokeContract(self.call.clone()),
                auth: self.auth.clone().try_into()?,
            }),
        };
        Ok(Transaction {
            source_account: MuxedAccount::Ed25519(Uint256(self.source)),
            fee: self.fee,
            seq_num: SequenceNumber(self.seq_num),
            cond: Preconditions::None,
            memo: Memo::None,
            operations: vec![operation].try_into()?,
            ext: match &self.soroban_data {
                Some(data) => TransactionExt::V1(data.clone()),
                None => TransactionExt::V0,
            },
        })
    }

    /// Hash that gets signed: `sha256(TransactionSignaturePayload)`.
    pub fn hash(&self, network_passphrase: &str) -> Result<[u8; 32], XdrError> {
        let payload = TransactionSignaturePayload {
            network_id: Hash(Sha256::digest(network_passphrase.as_bytes()).into()),
            tagged_transaction: TransactionSignaturePayloadTaggedTransaction::Tx(
                self.transaction()?,
            ),
        };
        Ok(Sha256::digest(payload.to_xdr(Limits::none())?).into())
    }

    /// Envelope without signatures, as sent to `simulateTransaction`.
    pub fn unsigned_envelope(&self) -> Result<TransactionEnvelope, XdrError> {
        Ok(TransactionEnvelope::Tx(TransactionV1Envelope {
            tx: self.transaction()?,
            signatures: Vec::new().try_into()?,
        }))
    }

    /// Signed envelope, as sent to `sendTransaction`.
    pub fn sign(
        &self,
        keypair: &Keypair,
        network_passphrase: &str,
    ) -> Result<TransactionEnvelope, XdrError> {
        let signature = keypair.sign(&self.hash(network_passphrase)?);
        let decorated = DecoratedSignature {
            hint: SignatureHint(keypair.hint()),
            signature: Signature(signature.to_vec().try_into()?),
        };
        Ok(TransactionEnvelope::Tx(TransactionV1Envelope {
            tx: self.transaction()?,
            signatures: vec![decorated].try_into()?,
        }))
    }
}

/// Hex transaction hash as reported by the RPC.
pub fn hash_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scval;
    use ed25519_dalek::{Signature as EdSignature, Verifier, VerifyingKey};
    use stellar_xdr::curr::ReadXdr;

    const ZERO_SEED: &str = "SAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAABSU2";
    const TESTNET: &str = "Test SDF Network ; September 2015";
    const POOL: &str = "CAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQC526";
    const KEEPER: &str = "GAAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQCAIBAEAQDZ7H";
    const BORROWER: &str = "GABQGAYDAMBQGAYDAMBQGAYDAMBQGAYDAMBQGAYDAMBQGAYDAMBQHGPC";

    fn call() -> InvokeContractArgs {
        contract_call(
            scval::parse_address(POOL).unwrap(),
            "liquidate",
            vec![
                scval::address(KEEPER).unwrap(),
                scval::address(BORROWER).unwrap(),
            ],
        )
        .unwrap()
    }

    /// Empty footprint, zero resources, resource fee 2500.
    fn resources() -> SorobanTransactionData {
        let mut bytes = vec![0u8; 24];
        bytes.extend(2_500i64.to_be_bytes());
        SorobanTransactionData::from_xdr(&bytes, Limits::none()).unwrap()
    }

    #[test]
    fn test_transaction_layout() {
        let tx = InvokeTransaction::new([9u8; 32], 100, 5, call());
        let bytes = tx.transaction().unwrap().to_xdr(Limits::none()).unwrap();
        // muxed account tag, then the key
        assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..36], &[9u8; 32]);
        // fee and sequence number
        assert_eq!(&bytes[36..40], &100u32.to_be_bytes());
        assert_eq!(&bytes[40..48], &5i64.to_be_bytes());
        // no soroban data
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_assemble_adds_resource_fee() {
        let tx = InvokeTransaction::new([9u8; 32], 100, 5, call()).assemble(resources(), vec![], 2_500);
        assert_eq!(tx.fee, 2_600);
        let built = tx.transaction().unwrap();
        assert!(matches!(built.ext, TransactionExt::V1(ref data) if data.resource_fee == 2_500));
    }

    #[test]
    fn test_signature_over_hash() {
        let kp = Keypair::from_secret(ZERO_SEED).unwrap();
        let tx = InvokeTransaction::new(kp.public_key(), 100, 1, call());
        let encoded = tx
            .sign(&kp, TESTNET)
            .unwrap()
            .to_xdr(Limits::none())
            .unwrap();

        let TransactionEnvelope::Tx(envelope) =
            TransactionEnvelope::from_xdr(&encoded, Limits::none()).unwrap()
        else {
            panic!("expected a v1 envelope");
        };
        assert_eq!(envelope.tx, tx.transaction().unwrap());
        assert_eq!(envelope.signatures.len(), 1);
        let decorated = &envelope.signatures[0];
        assert_eq!(decorated.hint.0, kp.hint());

        let mut raw = [0u8; 64];
        raw.copy_from_slice(decorated.signature.0.as_slice());
        let vk = VerifyingKey::from_bytes(&kp.public_key()).unwrap();
        let hash = tx.hash(TESTNET).unwrap();
        assert!(vk.verify(&hash, &EdSignature::from_bytes(&raw)).is_ok());
        assert_eq!(hash_hex(&hash).len(), 64);
        // A different network produces a different hash.
        assert_ne!(
            hash,
            tx.hash("Public Global Stellar Network ; September 2015").unwrap()
        );
    }

    #[test]
    fn test_unsigned_envelope_has_no_signatures() {
        let tx = InvokeTransaction::new([9u8; 32], 100, 0, call());
        let TransactionEnvelope::Tx(envelope) = tx.unsigned_envelope().unwrap() else {
            panic!("expected a v1 envelope");
        };
        assert!(envelope.signatures.is_empty());
    }

    #[test]
    fn test_rejects_long_function_name() {
        let contract = scval::parse_address(POOL).unwrap();
        assert!(contract_call(contract, &"f".repeat(40), vec![]).is_err());
    }
}
