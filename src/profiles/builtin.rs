use super::schema::{CadenceBounds, ContentTemplates, MessageTemplate, ServiceProfile, SeverityWeights};

pub fn builtin_profiles() -> Vec<ServiceProfile> {
    vec![
        payment_gateway_profile(),
        stock_trading_profile(),
        user_profile_profile(),
    ]
}

pub fn payment_gateway_profile() -> ServiceProfile {
    ServiceProfile {
        name: "PaymentGatewayService".to_string(),
        node_prefix: "PaymentService".to_string(),
        fault_probability: 0.03,
        recovery_steps: steps(&[
            "Initiating payment gateway shutdown",
            "Securing payment channels",
            "Backing up transaction logs",
            "Verifying payment security protocols",
            "Restarting payment processors",
            "Validating payment gateway integrations",
        ]),
        recovery_complete_message: "Recovery complete: Payment gateway restored".to_string(),
        log_interval: CadenceBounds {
            min_secs: 1,
            max_secs: 2,
        },
        severity_weights: SeverityWeights {
            info: 0.85,
            warn: 0.10,
            error: 0.05,
        },
        templates: ContentTemplates {
            info: vec![
                MessageTemplate::text("Payment processed successfully - Amount: ₹{n} via UPI"),
                MessageTemplate::text("New payment provider integration health check completed"),
                MessageTemplate::text("User {id} wallet recharged with ₹{n}"),
                MessageTemplate::text("Daily transaction count: {n} payments processed"),
                MessageTemplate::text("Payment reconciliation completed for VISA"),
            ],
            warn: vec![
                MessageTemplate::with_latency("High latency detected in CREDIT_CARD gateway", 2000, 5000, 3000),
                MessageTemplate::with_latency("Payment gateway approaching rate limit threshold", 2000, 5000, 3000),
            ],
            error: vec![
                MessageTemplate::with_error(
                    "Payment authorization failed for transaction #{id}",
                    "PAY_001",
                    "Card declined by issuing bank",
                ),
                MessageTemplate::with_error(
                    "Payment gateway connection timeout with MASTERCARD",
                    "PAY_002",
                    "Gateway connection timeout after 30 seconds",
                ),
                MessageTemplate::with_error(
                    "Invalid payment token detected",
                    "PAY_003",
                    "Payment token validation failed - possible security breach",
                ),
            ],
            fatal: vec![
                MessageTemplate::with_error(
                    "Critical failure in payment processing system",
                    "FATAL_001",
                    "Payment gateway core services non-responsive",
                ),
                MessageTemplate::with_error(
                    "Payment security system breach detected",
                    "FATAL_002",
                    "Multiple suspicious transactions detected - initiating emergency shutdown",
                ),
            ],
        },
    }
}

pub fn stock_trading_profile() -> ServiceProfile {
    ServiceProfile {
        name: "StockTradingService".to_string(),
        node_prefix: "StockService".to_string(),
        fault_probability: 0.05,
        recovery_steps: steps(&[
            "Initiating emergency shutdown",
            "Backing up critical data",
            "Resetting system state",
            "Reinitializing core components",
            "Performing integrity checks",
        ]),
        recovery_complete_message: "Recovery complete: System restored".to_string(),
        log_interval: CadenceBounds {
            min_secs: 1,
            max_secs: 4,
        },
        severity_weights: SeverityWeights {
            info: 0.60,
            warn: 0.25,
            error: 0.15,
        },
        templates: ContentTemplates {
            info: vec![
                MessageTemplate::text("Successfully processed buy order for AXISBANK stock"),
                MessageTemplate::text("Market data update received for {n} stocks"),
                MessageTemplate::text("User {id} accessed portfolio dashboard"),
                MessageTemplate::text("Daily trading volume: {n} transactions"),
            ],
            warn: vec![MessageTemplate::with_latency(
                "API response time exceeding threshold for ADANIPORTS",
                100,
                500,
                200,
            )],
            error: vec![
                MessageTemplate::with_error(
                    "Failed to execute trade order #{id}",
                    "TRADE_001",
                    "Insufficient funds in account",
                ),
                MessageTemplate::with_error(
                    "Database connection timeout for stock BAJAJ-AUTO",
                    "DB_001",
                    "Connection timed out after 30 seconds",
                ),
            ],
            fatal: vec![
                MessageTemplate::with_error(
                    "Critical system failure detected in trading engine",
                    "FATAL_001",
                    "Trading engine core components non-responsive",
                ),
                MessageTemplate::with_error(
                    "Catastrophic database corruption detected",
                    "FATAL_002",
                    "Database integrity check failed - immediate attention required",
                ),
            ],
        },
    }
}

pub fn user_profile_profile() -> ServiceProfile {
    ServiceProfile {
        name: "UserProfileService".to_string(),
        node_prefix: "UserService".to_string(),
        fault_probability: 0.05,
        recovery_steps: steps(&[
            "Initiating authentication service restart",
            "Validating database integrity",
            "Rebuilding user session cache",
            "Verifying profile data consistency",
            "Restoring service connections",
        ]),
        recovery_complete_message: "Recovery complete: Profile service restored".to_string(),
        log_interval: CadenceBounds {
            min_secs: 1,
            max_secs: 3,
        },
        severity_weights: SeverityWeights {
            info: 0.70,
            warn: 0.20,
            error: 0.10,
        },
        templates: ContentTemplates {
            info: vec![
                MessageTemplate::text("User {id} updated profile fields: address, phone, email"),
                MessageTemplate::text("Password successfully changed for user {id}"),
                MessageTemplate::text("Profile accessed by user {id}"),
                MessageTemplate::text("Two-factor authentication configured for user {id}"),
            ],
            warn: vec![
                MessageTemplate::with_latency("High latency detected in profile data retrieval", 300, 800, 300),
                MessageTemplate::with_latency("Multiple failed login attempts detected", 150, 200, 150),
                MessageTemplate::with_latency(
                    "Profile image upload size exceeding recommended limit",
                    400,
                    900,
                    400,
                ),
            ],
            error: vec![
                MessageTemplate::with_error(
                    "Failed to update user profile",
                    "PROF_001",
                    "Database constraint violation - duplicate email",
                ),
                MessageTemplate::with_error(
                    "Profile picture upload failed",
                    "PROF_002",
                    "Invalid file format - only JPG/PNG allowed",
                ),
                MessageTemplate::with_error(
                    "2FA verification failed",
                    "AUTH_001",
                    "Invalid authentication code provided",
                ),
            ],
            fatal: vec![
                MessageTemplate::with_error(
                    "Critical failure in user authentication system",
                    "FATAL_001",
                    "Authentication service connection lost",
                ),
                MessageTemplate::with_error(
                    "Profile database corruption detected",
                    "FATAL_002",
                    "Database integrity check failed - immediate attention required",
                ),
            ],
        },
    }
}

fn steps(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
