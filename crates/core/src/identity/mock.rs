//! # モック認証
//!
//! `MOCK_MODE=true` のGatewayとテストで使う、ネットワークに出ない認証実装。
//!
//! 生成する証明の先頭ワードはシグナルハッシュ（hashToField）と一致する。
//! ヌリファイアは利用者・アクション・シグナルから決定的に導出する。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use zzin_crypto::{keccak256, signal_hash, Address};
use zzin_types::ProofPayload;

use super::{
    IdentityError, IdentityProof, IdentityProvider, IdentityVerifier, ProofVerdict, WalletConnector,
    WalletSession,
};

/// モックのMerkleルート
pub fn mock_merkle_root() -> [u8; 32] {
    signal_hash(b"zzin-mock-merkle-root")
}

/// 証明の生成と検証を兼ねるモック。
pub struct MockIdentity {
    user_secret: [u8; 32],
    cancel_next: AtomicBool,
    reject_all: AtomicBool,
    requested: Mutex<Vec<String>>,
}

impl MockIdentity {
    pub fn new(user: &str) -> Self {
        Self {
            user_secret: keccak256(user.as_bytes()),
            cancel_next: AtomicBool::new(false),
            reject_all: AtomicBool::new(false),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// 次の証明要求を利用者がキャンセルしたことにする。
    pub fn cancel_next(&self) {
        self.cancel_next.store(true, Ordering::SeqCst);
    }

    /// 以降の検証をすべて拒否する（`false` で解除）。
    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    /// これまでに証明を要求されたシグナルの一覧
    pub fn requested_signals(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|signals| signals.clone())
            .unwrap_or_default()
    }

    /// 指定したシグナルの証明ペイロードを生成する。
    pub fn payload_for(&self, action: &str, signal: &str) -> ProofPayload {
        let mut seed = Vec::with_capacity(32 + action.len() + signal.len() + 1);
        seed.extend_from_slice(&self.user_secret);
        seed.extend_from_slice(action.as_bytes());
        seed.push(0);
        seed.extend_from_slice(signal.as_bytes());
        let nullifier = signal_hash(&seed);

        let mut proof = hex::encode(signal_hash(signal.as_bytes()));
        for i in 1u8..8 {
            let mut word_seed = nullifier.to_vec();
            word_seed.push(i);
            proof.push_str(&hex::encode(keccak256(&word_seed)));
        }

        ProofPayload {
            merkle_root: format!("0x{}", hex::encode(mock_merkle_root())),
            nullifier_hash: format!("0x{}", hex::encode(nullifier)),
            proof: format!("0x{proof}"),
            verification_level: "orb".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MockIdentity {
    async fn request_proof(&self, action: &str, signal: &str) -> Result<ProofPayload, IdentityError> {
        if self.cancel_next.swap(false, Ordering::SeqCst) {
            return Err(IdentityError::Cancelled);
        }
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(signal.to_string());
        }
        Ok(self.payload_for(action, signal))
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for MockIdentity {
    async fn verify(&self, proof: &IdentityProof, _action: &str) -> Result<ProofVerdict, IdentityError> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Ok(ProofVerdict::rejected(
                "invalid_proof",
                Some("モック検証が拒否するよう設定されています".to_string()),
            ));
        }
        if proof.merkle_root != mock_merkle_root() {
            return Ok(ProofVerdict::rejected("invalid_merkle_root", None));
        }
        if proof.proof[0] != signal_hash(proof.signal.as_bytes()) {
            return Ok(ProofVerdict::rejected(
                "invalid_proof",
                Some("証明がシグナルと一致しません".to_string()),
            ));
        }
        Ok(ProofVerdict::accepted())
    }
}

/// 固定アドレスを返すウォレット。
pub struct MockWallet {
    session: WalletSession,
    decline: AtomicBool,
}

impl MockWallet {
    pub fn new(address: Address, username: Option<&str>) -> Self {
        Self {
            session: WalletSession {
                address,
                username: username.map(str::to_string),
            },
            decline: AtomicBool::new(false),
        }
    }

    /// 接続要求を拒否するかどうか。
    pub fn set_decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl WalletConnector for MockWallet {
    async fn connect(&self) -> Result<WalletSession, IdentityError> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(IdentityError::WalletRejected(
                "利用者が接続を拒否しました".to_string(),
            ));
        }
        Ok(self.session.clone())
    }
}
