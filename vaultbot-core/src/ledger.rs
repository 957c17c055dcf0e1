//! The ledger adapter (C4): the thin capability interface the core
//! consumes for chain RPC, the enriched-transaction indexer, and the swap
//! router. The concrete `reqwest`-based client is deliberately minimal —
//! per the scope note in `SPEC_FULL.md`, the wire formats of these three
//! upstream services are external collaborators, not part of this crate's
//! contract surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::model::{Lamports, TokenAmount};

/// A single balance-changing entry inside an [`EnrichedTx`]'s `accountData`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDataEntry {
    pub account: String,
    pub native_balance_change: i64,
    pub token_balance_changes: Vec<TokenBalanceChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalanceChange {
    pub user_account: String,
    pub mint: String,
    pub raw_amount: i128,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub mint: String,
    pub from_user_account: String,
    pub to_user_account: String,
    pub token_amount: TokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub from_user_account: String,
    pub to_user_account: String,
    pub amount: Lamports,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapTokenOutput {
    pub user_account: String,
    pub mint: String,
    pub raw_amount: TokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub native_input: Option<Lamports>,
    pub token_outputs: Vec<SwapTokenOutput>,
}

/// An indexer's post-processed view of an on-chain transaction (§4.2
/// glossary: "Enriched transaction").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTx {
    pub signature: String,
    pub timestamp: i64,
    pub tx_type: String,
    pub source: String,
    pub token_transfers: Vec<TokenTransfer>,
    pub native_transfers: Vec<NativeTransfer>,
    pub swap: Option<SwapEvent>,
    pub account_data: Vec<AccountDataEntry>,
}

#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub signature: String,
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub in_mint: String,
    pub out_mint: String,
    pub in_amount: Lamports,
    pub slippage_bps: u16,
    /// Opaque upstream quote payload, threaded back into `execute_signed_swap`
    /// unmodified.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub success: bool,
    pub signature: Option<String>,
    pub error: Option<String>,
    pub in_amount: Lamports,
    pub out_amount: TokenAmount,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub success: bool,
    pub signatures: Vec<String>,
    pub error: Option<String>,
}

/// Dry-run execution never touches the network; it still needs *some*
/// recognizable signature so the side-file transparency artifacts (§4.15)
/// and round records can tell a dry-run attempt apart from a real one.
pub const DRY_RUN_SENTINEL_SIGNATURE: &str = "DRY_RUN_SIMULATED_SIGNATURE";
/// A reward-batch dry run simulates both the transfer transaction and the
/// associated-account creation transaction that precedes it on-chain, so it
/// reports two sentinel signatures rather than one (§4.8).
pub const DRY_RUN_SENTINEL_SIGNATURE_2: &str = "DRY_RUN_SIMULATED_SIGNATURE_2";

#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    async fn get_native_balance(&self, address: &str) -> Result<Lamports, LedgerError>;

    async fn get_token_balance(
        &self,
        owner: &str,
        mint: &str,
    ) -> Result<TokenAmount, LedgerError>;

    async fn get_token_decimals(&self, mint: &str) -> Result<u8, LedgerError>;

    async fn get_latest_blockhash(&self) -> Result<(String, u64), LedgerError>;

    async fn get_signatures_for_address(
        &self,
        address: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SignatureInfo>, LedgerError>;

    async fn fetch_enriched_transactions(
        &self,
        address: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<EnrichedTx>, LedgerError>;

    async fn get_swap_quote(
        &self,
        in_mint: &str,
        out_mint: &str,
        amount: Lamports,
        slippage_bps: u16,
    ) -> Result<Quote, LedgerError>;

    /// In dry-run mode, implementations must return a synthetic success
    /// with [`DRY_RUN_SENTINEL_SIGNATURE`] and perform no network I/O
    /// (§4.2).
    async fn execute_signed_swap(&self, quote: Quote) -> Result<SwapOutcome, LedgerError>;

    /// Transfers `amount` of `mint` from the treasury to each of `winners`,
    /// batched by the caller into at most `maxSendsPerTx` per call. In
    /// dry-run mode, returns a synthetic success with two sentinel
    /// signatures and performs no network I/O (§4.8).
    async fn execute_reward_batch(
        &self,
        mint: &str,
        winners: &[(String, TokenAmount)],
    ) -> Result<TransferOutcome, LedgerError>;
}

/// A `reqwest`-backed [`LedgerAdapter`]. The exact request/response shapes
/// of the RPC node, the indexer, and the swap router are upstream
/// contracts outside this crate's scope (§1); this client only needs to
/// satisfy the trait, so its bodies are a thin, typed HTTP veneer.
pub struct HttpLedgerAdapter {
    client: reqwest::Client,
    rpc_url: String,
    indexer_api_key: String,
    dry_run: bool,
}

impl HttpLedgerAdapter {
    pub fn new(rpc_url: String, indexer_api_key: String, dry_run: bool) -> Self {
        HttpLedgerAdapter {
            client: reqwest::Client::new(),
            rpc_url,
            indexer_api_key,
            dry_run,
        }
    }
}

#[async_trait]
impl LedgerAdapter for HttpLedgerAdapter {
    async fn get_native_balance(&self, address: &str) -> Result<Lamports, LedgerError> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "getBalance",
                "params": [address],
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let lamports = body["result"]["value"]
            .as_u64()
            .ok_or_else(|| LedgerError::Upstream("missing result.value".into()))?;
        Ok(Lamports(lamports))
    }

    async fn get_token_balance(
        &self,
        owner: &str,
        mint: &str,
    ) -> Result<TokenAmount, LedgerError> {
        // Non-existent associated token account ⇒ 0 (§4.2).
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "getTokenAccountsByOwner",
                "params": [owner, {"mint": mint}, {"encoding": "jsonParsed"}],
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let amount = body["result"]["value"]
            .get(0)
            .and_then(|v| v["account"]["data"]["parsed"]["info"]["tokenAmount"]["amount"].as_str())
            .and_then(|s| s.parse::<u128>().ok())
            .unwrap_or(0);
        Ok(TokenAmount(amount))
    }

    async fn get_token_decimals(&self, mint: &str) -> Result<u8, LedgerError> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "getTokenSupply",
                "params": [mint],
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let decimals = body["result"]["value"]["decimals"]
            .as_u64()
            .ok_or_else(|| LedgerError::Upstream("missing result.value.decimals".into()))?;
        Ok(decimals as u8)
    }

    async fn get_latest_blockhash(&self) -> Result<(String, u64), LedgerError> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "getLatestBlockhash",
                "params": [],
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let blockhash = body["result"]["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| LedgerError::Upstream("missing blockhash".into()))?
            .to_string();
        let last_valid_height = body["result"]["value"]["lastValidBlockHeight"]
            .as_u64()
            .unwrap_or(0);
        Ok((blockhash, last_valid_height))
    }

    async fn get_signatures_for_address(
        &self,
        address: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SignatureInfo>, LedgerError> {
        let mut params = serde_json::json!({"limit": limit});
        if let Some(before) = before {
            params["before"] = serde_json::Value::String(before.to_string());
        }
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "getSignaturesForAddress",
                "params": [address, params],
            }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let entries = body["result"]
            .as_array()
            .ok_or_else(|| LedgerError::Upstream("missing result array".into()))?;
        Ok(entries
            .iter()
            .filter_map(|e| {
                Some(SignatureInfo {
                    signature: e["signature"].as_str()?.to_string(),
                    block_time: e["blockTime"].as_i64(),
                })
            })
            .collect())
    }

    async fn fetch_enriched_transactions(
        &self,
        address: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<EnrichedTx>, LedgerError> {
        let mut url = format!(
            "https://indexer.example.invalid/v0/addresses/{address}/transactions?limit={limit}&api-key={}",
            self.indexer_api_key
        );
        if let Some(before) = before {
            url.push_str(&format!("&before={before}"));
        }
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        resp.json::<Vec<EnrichedTx>>()
            .await
            .map_err(|e| LedgerError::Upstream(e.to_string()))
    }

    async fn get_swap_quote(
        &self,
        in_mint: &str,
        out_mint: &str,
        amount: Lamports,
        slippage_bps: u16,
    ) -> Result<Quote, LedgerError> {
        let url = format!(
            "https://swap.example.invalid/v1/quote?inputMint={in_mint}&outputMint={out_mint}&amount={}&slippageBps={slippage_bps}",
            amount.0
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Upstream(e.to_string()))?;
        Ok(Quote {
            in_mint: in_mint.to_string(),
            out_mint: out_mint.to_string(),
            in_amount: amount,
            slippage_bps,
            raw,
        })
    }

    async fn execute_signed_swap(&self, quote: Quote) -> Result<SwapOutcome, LedgerError> {
        if self.dry_run {
            return Ok(SwapOutcome {
                success: true,
                signature: Some(DRY_RUN_SENTINEL_SIGNATURE.to_string()),
                error: None,
                in_amount: quote.in_amount,
                out_amount: TokenAmount(0),
            });
        }
        let resp = self
            .client
            .post("https://swap.example.invalid/v1/swap")
            .json(&serde_json::json!({ "quoteResponse": quote.raw }))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LedgerError::Upstream(e.to_string()))?;
        let signature = body["signature"].as_str().map(|s| s.to_string());
        let out_amount = body["outAmount"]
            .as_str()
            .and_then(|s| s.parse::<u128>().ok())
            .unwrap_or(0);
        Ok(SwapOutcome {
            success: signature.is_some(),
            signature,
            error: body["error"].as_str().map(|s| s.to_string()),
            in_amount: quote.in_amount,
            out_amount: TokenAmount(out_amount),
        })
    }

    async fn execute_reward_batch(
        &self,
        _mint: &str,
        _winners: &[(String, TokenAmount)],
    ) -> Result<TransferOutcome, LedgerError> {
        if self.dry_run {
            return Ok(TransferOutcome {
                success: true,
                signatures: vec![
                    DRY_RUN_SENTINEL_SIGNATURE.to_string(),
                    DRY_RUN_SENTINEL_SIGNATURE_2.to_string(),
                ],
                error: None,
            });
        }
        // Real execution requires building a versioned transaction with
        // per-winner transfer (and, where needed, associated-account
        // creation) instructions, signing with the treasury key, and
        // submitting to the RPC node. That wire format is the chain RPC
        // client's contract, out of scope for this crate (§1).
        Err(LedgerError::Upstream(
            "live reward transfers are not implemented by the example HTTP adapter".into(),
        ))
    }
}
