//! Shared harness for integration tests: the full service graph wired
//! against `MemoryStore` and `StubGateway`, plus seed helpers.

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal_macros::dec;
use secrecy::Secret;
use uuid::Uuid;

use fee_service::config::{
    Config, DatabaseConfig, RazorpayConfig, ReconciliationConfig, ServerConfig,
};
use fee_service::models::{
    CategoryMeta, FeeLedger, FeeTemplate, ServicesOpted, Student, TemplateItem,
};
use fee_service::services::ledger::CreateLedgerCommand;
use fee_service::services::razorpay::StubGateway;
use fee_service::services::store::{FeeStore, MemoryStore};
use fee_service::AppState;

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: Secret::new("mongodb://localhost:27017".to_string()),
            db_name: "fee_test".to_string(),
        },
        razorpay: RazorpayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: Secret::new("test-key-secret".to_string()),
            webhook_secret: Secret::new("test-webhook-secret".to_string()),
            api_base_url: "http://localhost:0".to_string(),
        },
        reconciliation: ReconciliationConfig {
            max_charge_retries: 3,
            retry_backoff_hours: 24,
            receipt_prefix: "SF".to_string(),
        },
        service_name: "fee-service".to_string(),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<StubGateway>,
}

pub fn spawn_services() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(StubGateway::new());
    let state = AppState::assemble(test_config(), store.clone(), gateway.clone());
    TestApp {
        state,
        store,
        gateway,
    }
}

impl TestApp {
    /// Active second-semester student with no optional services.
    pub async fn seed_student(&self) -> Student {
        let student = Student::new(
            "Asha Verma".to_string(),
            "asha.verma@example.edu".to_string(),
            "B.Tech CSE".to_string(),
            2,
            8,
            ServicesOpted::default(),
        );
        self.store.insert_student(&student).await.unwrap();
        student
    }

    /// Template with Tuition 10000 and Lab 5000 for the given term.
    pub async fn seed_template(&self, semester: u32) -> FeeTemplate {
        let template = FeeTemplate::new(
            format!("B.Tech CSE sem {} fees", semester),
            "B.Tech CSE".to_string(),
            semester,
            "2025-26".to_string(),
            vec![
                TemplateItem {
                    category_id: Uuid::new_v4(),
                    name: "Tuition".to_string(),
                    amount: dec!(10000),
                    meta: CategoryMeta::custom(),
                    is_optional: false,
                },
                TemplateItem {
                    category_id: Uuid::new_v4(),
                    name: "Lab".to_string(),
                    amount: dec!(5000),
                    meta: CategoryMeta::custom(),
                    is_optional: false,
                },
            ],
        );
        self.store.insert_template(&template).await.unwrap();
        template
    }

    /// Student plus a 15000 ledger for their current term.
    pub async fn seed_student_with_ledger(&self) -> (Student, FeeLedger) {
        let student = self.seed_student().await;
        let template = self.seed_template(student.current_semester).await;
        let ledger = self
            .state
            .ledgers
            .create(CreateLedgerCommand {
                student_id: student.id,
                template_id: Some(template.id),
                semester: None,
                academic_year: None,
                due_date: None,
            })
            .await
            .unwrap();
        (student, ledger)
    }
}
