mod common;

use common::{Call, Harness, customer, webhook};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use walletrail::application::payments::{DepositRequest, TransferRequest};
use walletrail::application::router::Operation;
use walletrail::domain::money::{Balance, Currency};
use walletrail::domain::transaction::TransactionStatus;
use walletrail::domain::wallet::WalletStatus;
use walletrail::error::PaymentError;
use walletrail::providers::{Counterpart, Outcome, Provider};
use zeroize::Zeroizing;

fn bank_deposit(owner_id: Uuid, amount: rust_decimal::Decimal) -> DepositRequest {
    DepositRequest {
        owner_id,
        currency: Currency::Ngn,
        operation: Operation::BankDeposit,
        amount,
        customer: customer(owner_id),
        phone: None,
    }
}

#[tokio::test]
async fn test_deposit_webhook_delivered_twice_credits_once() {
    let harness = Harness::new(&[(Provider::NgnGateway, dec!(500))]);
    let wallet = harness.active_wallet(Currency::Ngn).await;

    let response = harness
        .service
        .initiate_deposit(bank_deposit(wallet.owner_id, dec!(5000)))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.status, "pending");
    let reference = response.reference.unwrap();
    assert_eq!(
        harness.adapter(Provider::NgnGateway).calls(),
        vec![Call::CreatePayment(reference.clone())]
    );

    let (signature, body) = webhook(&reference, "completed");
    let first = harness
        .webhooks
        .handle(Provider::NgnGateway, Some(&signature), &body)
        .await
        .unwrap();
    let second = harness
        .webhooks
        .handle(Provider::NgnGateway, Some(&signature), &body)
        .await
        .unwrap();
    assert_eq!(first.label(), "applied");
    assert_eq!(second.label(), "duplicate");

    let wallet = harness.ledger.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.balance, Balance::new(dec!(5000)));
    assert_eq!(wallet.available_balance, Balance::new(dec!(5000)));
}

#[tokio::test]
async fn test_deposit_below_minimum_never_reaches_provider() {
    let harness = Harness::new(&[(Provider::NgnGateway, dec!(500))]);
    let wallet = harness.active_wallet(Currency::Ngn).await;

    let err = harness
        .service
        .initiate_deposit(bank_deposit(wallet.owner_id, dec!(499.99)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAmount(_)));
    assert!(harness.adapter(Provider::NgnGateway).calls().is_empty());
    assert!(harness.ledger.pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payout_above_available_is_rejected_before_adapter() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Ngn).await;
    harness.fund(&wallet, dec!(8000)).await;

    let err = harness
        .service
        .initiate_transfer(TransferRequest {
            owner_id: wallet.owner_id,
            currency: Currency::Ngn,
            operation: Operation::BankPayout,
            amount: dec!(10000),
            counterpart: Counterpart::Bank {
                bank_code: "058".to_string(),
                account_number: "0123456789".to_string(),
                account_name: None,
            },
            pin: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InsufficientFunds { .. }));
    assert!(harness.adapter(Provider::NgnGateway).calls().is_empty());

    let wallet = harness.ledger.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.available_balance, Balance::new(dec!(8000)));
    assert!(harness.ledger.pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payout_failure_webhook_releases_reservation() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Ngn).await;
    harness.fund(&wallet, dec!(8000)).await;

    let response = harness
        .service
        .initiate_transfer(TransferRequest {
            owner_id: wallet.owner_id,
            currency: Currency::Ngn,
            operation: Operation::BankPayout,
            amount: dec!(3000),
            counterpart: Counterpart::Bank {
                bank_code: "058".to_string(),
                account_number: "0123456789".to_string(),
                account_name: Some("Ada".to_string()),
            },
            pin: None,
        })
        .await
        .unwrap();
    let reference = response.reference.unwrap();
    let reserved = harness.ledger.wallet(wallet.id).await.unwrap();
    assert_eq!(reserved.available_balance, Balance::new(dec!(5000)));
    assert_eq!(reserved.balance, Balance::new(dec!(8000)));

    let (signature, body) = webhook(&reference, "failed");
    harness
        .webhooks
        .handle(Provider::NgnGateway, Some(&signature), &body)
        .await
        .unwrap();
    let released = harness.ledger.wallet(wallet.id).await.unwrap();
    assert_eq!(released.available_balance, Balance::new(dec!(8000)));
    assert_eq!(released.balance, Balance::new(dec!(8000)));
}

#[tokio::test]
async fn test_pin_gated_transfer_without_pin_makes_no_provider_call() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Xaf).await;
    harness.fund(&wallet, dec!(20000)).await;

    let err = harness
        .service
        .initiate_transfer(TransferRequest {
            owner_id: wallet.owner_id,
            currency: Currency::Xaf,
            operation: Operation::MobilePayout,
            amount: dec!(5000),
            counterpart: Counterpart::Mobile {
                phone: "677123456".to_string(),
            },
            pin: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PinNotConfigured));
    assert!(harness.adapter(Provider::MobileMoney).calls().is_empty());
    assert!(harness.ledger.pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pin_gated_transfer_carries_proof_to_adapter() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Xaf).await;
    harness.fund(&wallet, dec!(20000)).await;
    harness
        .service
        .pins()
        .set_pin(wallet.owner_id, Zeroizing::new("4321".to_string()))
        .await
        .unwrap();

    let wrong = harness
        .service
        .initiate_transfer(TransferRequest {
            owner_id: wallet.owner_id,
            currency: Currency::Xaf,
            operation: Operation::BankPayout,
            amount: dec!(5000),
            counterpart: Counterpart::Bank {
                bank_code: "10005".to_string(),
                account_number: "CM2100050000".to_string(),
                account_name: None,
            },
            pin: Some(Zeroizing::new("0000".to_string())),
        })
        .await
        .unwrap_err();
    assert!(matches!(wrong, PaymentError::PinMismatch));
    assert!(harness.adapter(Provider::XafGateway).calls().is_empty());

    let response = harness
        .service
        .initiate_transfer(TransferRequest {
            owner_id: wallet.owner_id,
            currency: Currency::Xaf,
            operation: Operation::BankPayout,
            amount: dec!(5000),
            counterpart: Counterpart::Bank {
                bank_code: "10005".to_string(),
                account_number: "CM2100050000".to_string(),
                account_name: None,
            },
            pin: Some(Zeroizing::new("4321".to_string())),
        })
        .await
        .unwrap();
    assert_eq!(
        harness.adapter(Provider::XafGateway).calls(),
        vec![Call::CreatePayout {
            reference: response.reference.unwrap(),
            pin_verified: true,
        }]
    );
}

#[tokio::test]
async fn test_provisioning_timeout_then_retry_activates() {
    let harness = Harness::new(&[]);
    let owner = Uuid::new_v4();
    let wallet = harness.ledger.open_wallet(owner, Currency::Xaf).await.unwrap();
    harness
        .adapter(Provider::XafGateway)
        .script_provisioning(Outcome::Unavailable {
            reason: "timed out".to_string(),
        });

    let fields = BTreeMap::from([
        ("full_name".to_string(), "Ada Obi".to_string()),
        ("email".to_string(), "ada@example.com".to_string()),
    ]);
    let request = harness
        .activation
        .submit_kyc(owner, Currency::Xaf, fields)
        .await
        .unwrap();
    let report = harness
        .activation
        .approve_kyc(request.id, "ops@example.com")
        .await
        .unwrap();
    assert!(!report.activated());
    assert_eq!(report.wallet.status, WalletStatus::ActivationPending);
    assert!(matches!(
        report.provisioning_error,
        Some(PaymentError::ProvisioningFailed { .. })
    ));

    let wallet = harness.activation.retry_provisioning(wallet.id).await.unwrap();
    assert_eq!(wallet.status, WalletStatus::Active);
    let account = harness
        .ledger
        .stores()
        .provider_accounts
        .find(wallet.id, Provider::XafGateway)
        .await
        .unwrap()
        .expect("active wallet has a provider account");
    assert_eq!(wallet.provider_account_ref.as_deref(), Some(account.external_ref.as_str()));

    // A second retry on an active wallet is a no-op.
    let calls_before = harness.adapter(Provider::XafGateway).calls().len();
    harness.activation.retry_provisioning(wallet.id).await.unwrap();
    assert_eq!(harness.adapter(Provider::XafGateway).calls().len(), calls_before);
}

#[tokio::test]
async fn test_rejected_kyc_leaves_wallet_inactive() {
    let harness = Harness::new(&[]);
    let owner = Uuid::new_v4();
    let wallet = harness.ledger.open_wallet(owner, Currency::Usdt).await.unwrap();
    let request = harness
        .activation
        .submit_kyc(owner, Currency::Usdt, BTreeMap::new())
        .await
        .unwrap();
    harness
        .activation
        .reject_kyc(request.id, "document unreadable")
        .await
        .unwrap();

    assert_eq!(
        harness.ledger.wallet(wallet.id).await.unwrap().status,
        WalletStatus::Inactive
    );
    assert!(matches!(
        harness.activation.retry_provisioning(wallet.id).await,
        Err(PaymentError::InvalidTransition(_))
    ));
    assert!(harness.adapter(Provider::Chain).calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_webhooks_apply_once() {
    let harness = Arc::new(Harness::new(&[]));
    let wallet = harness.active_wallet(Currency::Ngn).await;
    let response = harness
        .service
        .initiate_deposit(bank_deposit(wallet.owner_id, dec!(1200)))
        .await
        .unwrap();
    let reference = response.reference.unwrap();
    let (signature, body) = webhook(&reference, "completed");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let harness = harness.clone();
        let signature = signature.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            harness
                .webhooks
                .handle(Provider::NgnGateway, Some(&signature), &body)
                .await
                .unwrap()
                .label()
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap() == "applied" {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    let wallet = harness.ledger.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.balance, Balance::new(dec!(1200)));
    let tx = harness.ledger.transaction(&reference).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_verify_deposit_keeps_pending_answer_pending() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Ngn).await;
    let response = harness
        .service
        .initiate_deposit(bank_deposit(wallet.owner_id, dec!(700)))
        .await
        .unwrap();
    let reference = response.reference.unwrap();

    let verified = harness.service.verify_deposit(&reference).await.unwrap();
    assert_eq!(verified.status, "pending");
    assert!(
        harness
            .adapter(Provider::NgnGateway)
            .calls()
            .contains(&Call::VerifyPayment(reference))
    );
}

fn bank_payout(owner_id: Uuid, amount: rust_decimal::Decimal) -> TransferRequest {
    TransferRequest {
        owner_id,
        currency: Currency::Ngn,
        operation: Operation::BankPayout,
        amount,
        counterpart: Counterpart::Bank {
            bank_code: "058".to_string(),
            account_number: "0123456789".to_string(),
            account_name: None,
        },
        pin: None,
    }
}

fn provision_refs(harness: &Harness, provider: Provider) -> Vec<String> {
    harness
        .adapter(provider)
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Provision(reference) => Some(reference),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_provisioning_retry_reuses_idempotency_key() {
    let harness = Harness::new(&[]);
    let owner = Uuid::new_v4();
    let wallet = harness.ledger.open_wallet(owner, Currency::Xaf).await.unwrap();
    harness
        .adapter(Provider::XafGateway)
        .script_provisioning(Outcome::Unavailable {
            reason: "timed out".to_string(),
        });
    let request = harness
        .activation
        .submit_kyc(owner, Currency::Xaf, BTreeMap::new())
        .await
        .unwrap();
    harness.activation.approve_kyc(request.id, "ops").await.unwrap();
    harness.activation.retry_provisioning(wallet.id).await.unwrap();

    let refs = provision_refs(&harness, Provider::XafGateway);
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0], refs[1]);
}

#[tokio::test]
async fn test_concurrent_retries_provision_once() {
    let harness = Arc::new(Harness::new(&[]));
    let owner = Uuid::new_v4();
    let wallet = harness.ledger.open_wallet(owner, Currency::Xaf).await.unwrap();
    harness
        .adapter(Provider::XafGateway)
        .script_provisioning(Outcome::Unavailable {
            reason: "timed out".to_string(),
        });
    let request = harness
        .activation
        .submit_kyc(owner, Currency::Xaf, BTreeMap::new())
        .await
        .unwrap();
    harness.activation.approve_kyc(request.id, "ops").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let activation = harness.activation.clone();
        handles.push(tokio::spawn(async move {
            activation.retry_provisioning(wallet.id).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().status, WalletStatus::Active);
    }
    // One failed attempt at approval, one successful retry.
    assert_eq!(provision_refs(&harness, Provider::XafGateway).len(), 2);
}

#[tokio::test]
async fn test_amount_finer_than_currency_unit_is_refused() {
    let harness = Harness::new(&[(Provider::NgnGateway, dec!(500))]);
    let wallet = harness.active_wallet(Currency::Ngn).await;

    let err = harness
        .service
        .initiate_deposit(bank_deposit(wallet.owner_id, dec!(500.005)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAmount(_)));
    assert!(harness.adapter(Provider::NgnGateway).calls().is_empty());
    assert!(harness.ledger.pending(10).await.unwrap().is_empty());

    let response = harness
        .service
        .initiate_deposit(bank_deposit(wallet.owner_id, dec!(500.50)))
        .await
        .unwrap();
    let reference = response.reference.unwrap();
    assert_eq!(
        harness.ledger.transaction(&reference).await.unwrap().amount.value(),
        dec!(500.50)
    );
    let (signature, body) = webhook(&reference, "completed");
    harness
        .webhooks
        .handle(Provider::NgnGateway, Some(&signature), &body)
        .await
        .unwrap();
    assert_eq!(
        harness.ledger.wallet(wallet.id).await.unwrap().balance,
        Balance::new(dec!(500.50))
    );
}

#[tokio::test]
async fn test_rejected_payout_reports_provider_reason() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Ngn).await;
    harness.fund(&wallet, dec!(8000)).await;
    harness
        .adapter(Provider::NgnGateway)
        .script_payout(Outcome::Rejected {
            reason: "Invalid account number".to_string(),
            raw: serde_json::Value::Null,
        });

    let response = harness
        .service
        .initiate_transfer(bank_payout(wallet.owner_id, dec!(3000)))
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.status, "failed");
    assert_eq!(
        response.message,
        PaymentError::ProviderRejected(Provider::NgnGateway, "Invalid account number".into())
            .to_string()
    );
    let wallet = harness.ledger.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.available_balance, Balance::new(dec!(8000)));
}

#[tokio::test]
async fn test_signed_webhook_from_other_provider_is_refused() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Ngn).await;
    let response = harness
        .service
        .initiate_deposit(bank_deposit(wallet.owner_id, dec!(2000)))
        .await
        .unwrap();
    let reference = response.reference.unwrap();

    // Both fakes share a secret, so the signature itself is valid.
    let (signature, body) = webhook(&reference, "completed");
    let err = harness
        .webhooks
        .handle(Provider::CardBank, Some(&signature), &body)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::UnknownReference(_)));

    let tx = harness.ledger.transaction(&reference).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(harness.ledger.wallet(wallet.id).await.unwrap().balance, Balance::ZERO);
}

#[tokio::test]
async fn test_frozen_wallet_cannot_transfer() {
    let harness = Harness::new(&[]);
    let wallet = harness.active_wallet(Currency::Ngn).await;
    harness.fund(&wallet, dec!(8000)).await;
    harness.activation.freeze(wallet.id).await.unwrap();

    let err = harness
        .service
        .initiate_transfer(bank_payout(wallet.owner_id, dec!(1000)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::WalletFrozen(id) if id == wallet.id));
    assert!(harness.adapter(Provider::NgnGateway).calls().is_empty());
    assert!(harness.ledger.pending(10).await.unwrap().is_empty());

    let wallet = harness.ledger.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.status, WalletStatus::Frozen);
    assert_eq!(wallet.available_balance, Balance::new(dec!(8000)));
}
