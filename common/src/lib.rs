// common/src/lib.rs
use alloy::consensus::TxReceipt as _;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::client::ClientBuilder;
use alloy::rpc::types::TransactionReceipt;
use alloy::sol;
use anyhow::{bail, ensure, Context, Result};
use bigdecimal::num_bigint::{BigInt, Sign, ToBigInt};
use bigdecimal::BigDecimal;
use dotenv::dotenv;
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use tokio::time::{sleep, Duration, Instant};

// ─────────────────── Configuration ───────────────────

pub struct Config {
    pub rpc_url: String,
}

pub fn load_config() -> Config {
    dotenv().ok();
    let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());
    Config { rpc_url }
}

pub struct TxDefaults {
    pub gas: u64,
    pub gas_price: u128,
}

/// Gas settings mirroring the 0x starter configuration, generous enough
/// for any of the sample transactions on a dev node.
pub const TX_DEFAULTS: TxDefaults = TxDefaults {
    gas: 8_000_000,
    gas_price: 1_000_000_000,
};

// ─────────────────── Constants ───────────────────

pub const DECIMALS: u32 = 18;

/// Pseudo-token address the exchange proxy accepts as "native ether".
pub const ETH_ADDRESS: Address = Address::repeat_byte(0xee);

pub const NULL_ADDRESS: Address = Address::ZERO;

pub mod networks {
    pub const MAINNET: u64 = 1;
    /// Chain id of the ganache snapshot the 0x migrations deploy to.
    pub const GANACHE: u64 = 1337;
}

// ─────────────────── Provider Engine ───────────────────

/// Owns the RPC transport for one scenario run. Every network call goes
/// through the provider handed out by [`ProviderEngine::provider`], and the
/// scenario binary releases the engine with [`ProviderEngine::stop`] on both
/// the success and the failure exit path.
pub struct ProviderEngine {
    provider: DynProvider,
    stopped: AtomicBool,
}

impl ProviderEngine {
    pub fn connect(cfg: &Config) -> Result<Self> {
        tracing::debug!(url = %cfg.rpc_url, "connecting provider engine");
        let rpc = ClientBuilder::default().http(cfg.rpc_url.parse().context("invalid RPC_URL")?);
        let provider = ProviderBuilder::new().connect_client(rpc).erased();
        Ok(Self::new(provider))
    }

    pub fn new(provider: DynProvider) -> Self {
        Self {
            provider,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Ordered list of the node's unlocked accounts.
    pub async fn available_addresses(&self) -> Result<Vec<Address>> {
        self.provider
            .get_accounts()
            .await
            .context("could not fetch available addresses")
    }

    /// Idempotent; the first call wins.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("provider engine stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

// ─────────────────── Contract Bindings & Deployed Addresses ───────────────────

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IZeroEx {
        struct Transformation {
            uint32 deploymentNonce;
            bytes data;
        }

        function transformERC20(
            address inputToken,
            address outputToken,
            uint256 inputTokenAmount,
            uint256 minOutputTokenAmount,
            Transformation[] calldata transformations
        ) external payable returns (uint256 outputTokenAmount);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContractAddresses {
    pub exchange_proxy: Address,
    pub zrx_token: Address,
    pub ether_token: Address,
}

static DEPLOYMENT_INFO: LazyLock<HashMap<u64, ContractAddresses>> = LazyLock::new(|| {
    use alloy::primitives::address;
    maplit::hashmap! {
        networks::MAINNET => ContractAddresses {
            exchange_proxy: address!("0xDef1C0ded9bec7F1a1670819833240f027b25EfF"),
            zrx_token: address!("0xE41d2489571d322189246DaFA5ebDe1F4699F498"),
            ether_token: address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
        },
        networks::GANACHE => ContractAddresses {
            exchange_proxy: address!("0x5315e44798395d4a952530d131249fe00f554565"),
            zrx_token: address!("0x871dd7c2b4b25e1aa18728e9d5f2af4c4e431f5c"),
            ether_token: address!("0x0b1ba0af832d7c05fd64161e0db78e85978e8082"),
        },
    }
});

impl ContractAddresses {
    pub fn for_chain(chain_id: u64) -> Result<Self> {
        DEPLOYMENT_INFO
            .get(&chain_id)
            .copied()
            .with_context(|| format!("no deployment info for chain {chain_id}"))
    }
}

/// The 0x migration suite is external to this workspace, so "running it once
/// if required" amounts to verifying its output exists: the exchange proxy
/// must have bytecode at its expected address. Safe to call every run.
pub async fn run_migrations_once_if_required(
    provider: &DynProvider,
    addresses: &ContractAddresses,
) -> Result<()> {
    let code = provider
        .get_code_at(addresses.exchange_proxy)
        .await
        .context("could not fetch exchange proxy code")?;
    ensure!(
        !code.is_empty(),
        "no contract code at exchange proxy {}; run the 0x migrations against this node first",
        addresses.exchange_proxy,
    );
    Ok(())
}

// ─────────────────── Base Unit Conversion ───────────────────

/// Scales a decimal token amount into its integer base-unit representation,
/// e.g. `0.1` at 18 decimals becomes `100000000000000000`.
pub fn to_base_unit_amount(amount: &BigDecimal, decimals: u32) -> Result<U256> {
    ensure!(amount.sign() != Sign::Minus, "amount {amount} is negative");
    let scaled = amount * BigDecimal::new(BigInt::from(1), -i64::from(decimals));
    ensure!(
        scaled.is_integer(),
        "amount {amount} has more than {decimals} decimal places"
    );
    let int = scaled
        .to_bigint()
        .with_context(|| format!("amount {amount} is not representable"))?;
    let (_, bytes) = int.to_bytes_be();
    ensure!(bytes.len() <= 32, "amount {amount} overflows 256 bits");
    Ok(U256::from_be_slice(&bytes))
}

pub fn from_base_unit_amount(amount: U256, decimals: u32) -> BigDecimal {
    let int = BigInt::from_bytes_be(Sign::Plus, &amount.to_be_bytes::<32>());
    BigDecimal::new(int, i64::from(decimals)).normalized()
}

// ─────────────────── Print Utils ───────────────────

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub struct BalanceRow {
    pub account: String,
    pub ether: U256,
    pub tokens: Vec<(String, U256)>,
}

/// Console reporting for a scenario: the account table, the balance tables
/// before and after the transaction, and the receipt summary.
pub struct PrintUtils {
    provider: DynProvider,
    accounts: Vec<(String, Address)>,
    tokens: Vec<(String, Address)>,
}

impl PrintUtils {
    pub fn new(
        provider: DynProvider,
        accounts: Vec<(String, Address)>,
        tokens: Vec<(String, Address)>,
    ) -> Self {
        Self {
            provider,
            accounts,
            tokens,
        }
    }

    pub fn print_scenario(name: &str) {
        println!();
        println!("================== {name} ==================");
    }

    pub fn print_accounts(&self) {
        println!();
        println!("Accounts");
        for (name, address) in &self.accounts {
            println!("  {name:<8} {address}");
        }
    }

    /// One row per account, native ether first, then each token in the
    /// configured order.
    pub async fn fetch_balances(&self) -> Result<Vec<BalanceRow>> {
        let mut rows = Vec::new();
        for (name, account) in &self.accounts {
            let ether = self
                .provider
                .get_balance(*account)
                .await
                .with_context(|| format!("could not fetch ether balance of {name}"))?;
            let mut tokens = Vec::new();
            for (symbol, token) in &self.tokens {
                let balance = IERC20::new(*token, self.provider.clone())
                    .balanceOf(*account)
                    .call()
                    .await
                    .with_context(|| format!("could not fetch {symbol} balance of {name}"))?;
                tokens.push((symbol.clone(), balance));
            }
            rows.push(BalanceRow {
                account: name.clone(),
                ether,
                tokens,
            });
        }
        Ok(rows)
    }

    pub async fn fetch_and_print_balances(&self) -> Result<()> {
        let rows = self.fetch_balances().await?;
        println!();
        let mut header = format!("{:<8} {:>24}", "Balances", "ETH");
        for (symbol, _) in &self.tokens {
            header.push_str(&format!(" {symbol:>24}"));
        }
        println!("{header}");
        for row in rows {
            let mut line = format!(
                "{:<8} {:>24}",
                row.account,
                from_base_unit_amount(row.ether, DECIMALS)
            );
            for (_, balance) in &row.tokens {
                line.push_str(&format!(
                    " {:>24}",
                    from_base_unit_amount(*balance, DECIMALS)
                ));
            }
            println!("{line}");
        }
        Ok(())
    }

    /// Polls the node until the transaction is mined, then checks the receipt
    /// status. Errors if the transaction reverted or the deadline passes.
    pub async fn await_transaction_mined(
        &self,
        label: &str,
        tx_hash: B256,
    ) -> Result<TransactionReceipt> {
        println!();
        println!("Waiting for {label} transaction {tx_hash} to be mined...");
        let deadline = Instant::now() + RECEIPT_TIMEOUT;
        loop {
            if let Some(receipt) = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .with_context(|| format!("could not poll receipt of {label}"))?
            {
                ensure_receipt_success(label, &receipt)?;
                return Ok(receipt);
            }
            ensure!(
                Instant::now() < deadline,
                "{label} transaction {tx_hash} was not mined within {RECEIPT_TIMEOUT:?}"
            );
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    pub fn print_transaction(&self, label: &str, receipt: &TransactionReceipt) {
        println!();
        println!("Transaction: {label}");
        println!("  {:<10} {}", "hash", receipt.transaction_hash);
        println!(
            "  {:<10} {}",
            "status",
            if receipt.status() { "success" } else { "reverted" }
        );
        if let Some(block) = receipt.block_number {
            println!("  {:<10} {block}", "block");
        }
        println!("  {:<10} {}", "gas used", receipt.gas_used);
        println!("  {:<10} {}", "logs", receipt.inner.logs().len());
    }
}

fn ensure_receipt_success(label: &str, receipt: &TransactionReceipt) -> Result<()> {
    ensure!(
        receipt.status(),
        "{label} transaction {} reverted",
        receipt.transaction_hash
    );
    Ok(())
}

// ─────────────────── Transform ERC20 Flow ───────────────────

/// Sells 0.1 native ether for ZRX through the exchange proxy's
/// `transformERC20` entry point. The minimum output amount is zero, which
/// keeps the sample safe to run against any dev node: the call succeeds even
/// when no transformer is configured to perform a real conversion.
pub async fn transform_erc20_flow(engine: &ProviderEngine) -> Result<()> {
    let provider = engine.provider();
    let chain_id = provider
        .get_chain_id()
        .await
        .context("could not fetch current chain id")?;
    let addresses = ContractAddresses::for_chain(chain_id)?;
    run_migrations_once_if_required(provider, &addresses).await?;

    PrintUtils::print_scenario("Transform ERC20");

    let accounts = engine.available_addresses().await?;
    let (maker, taker) = match accounts.as_slice() {
        [maker, taker, ..] => (*maker, *taker),
        _ => bail!(
            "need at least two unlocked accounts, node returned {}",
            accounts.len()
        ),
    };

    let input_amount = to_base_unit_amount(&"0.1".parse::<BigDecimal>()?, DECIMALS)?;
    let min_output_amount = to_base_unit_amount(&BigDecimal::from(0), DECIMALS)?;

    let print_utils = PrintUtils::new(
        provider.clone(),
        vec![("maker".to_string(), maker), ("taker".to_string(), taker)],
        vec![
            ("WETH".to_string(), addresses.ether_token),
            ("ZRX".to_string(), addresses.zrx_token),
        ],
    );
    print_utils.print_accounts();
    print_utils.fetch_and_print_balances().await?;
    println!();
    println!("Selling {input_amount} base units of ether for at least {min_output_amount} ZRX");

    // Submitted from the node's unlocked taker account, so the node signs.
    let exchange_proxy = IZeroEx::new(addresses.exchange_proxy, provider.clone());
    let pending = exchange_proxy
        .transformERC20(
            ETH_ADDRESS,
            addresses.zrx_token,
            input_amount,
            min_output_amount,
            vec![],
        )
        .from(taker)
        .value(input_amount)
        .gas(TX_DEFAULTS.gas)
        .gas_price(TX_DEFAULTS.gas_price)
        .send()
        .await
        .context("could not submit transformERC20 transaction")?;
    let tx_hash = *pending.tx_hash();

    let receipt = print_utils
        .await_transaction_mined("TransformERC20", tx_hash)
        .await?;
    print_utils.print_transaction("TransformERC20", &receipt);

    print_utils.fetch_and_print_balances().await?;
    Ok(())
}

// ─────────────────── Tests ───────────────────
