use super::models::{Config, RetryBudget};
use crate::provider::JobKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Retry budget '{name}' must allow at least one attempt")]
    NoRetryAttempts { name: String },

    #[error("Retry budget '{name}': max_delay ({max}) is shorter than base_delay ({base})")]
    RetryDelayInverted {
        name: String,
        base: String,
        max: String,
    },

    #[error("Duration '{field}' must be positive")]
    ZeroDuration { field: String },

    #[error("poll.backoff_multiplier must be >= 1.0, got {0}")]
    InvalidBackoffMultiplier(f64),

    #[error("poll.max_attempts must be positive")]
    NoPollAttempts,

    #[error("Poll budget for '{kind}' must allow at least one attempt")]
    NoKindPollAttempts { kind: String },

    #[error("Poll timeout '{field}' ({timeout}) must be shorter than cache.ttl ({ttl})")]
    PollOutlivesCache {
        field: String,
        timeout: String,
        ttl: String,
    },

    #[error("Price for '{operation}' must not be negative: {price}")]
    NegativePrice { operation: String, price: i64 },

    #[error("No model configured for job kind '{0}'")]
    MissingModel(JobKind),

    #[error("Unknown job kind '{0}' in configuration")]
    UnknownJobKind(String),

    #[error("Invalid provider base URL '{url}', expected http:// or https://")]
    InvalidBaseUrl { url: String },

    #[error("workers.count must be at least 1")]
    NoWorkers,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_provider(config)?;
    validate_retry("submit", &config.retry.submit)?;
    validate_retry("result", &config.retry.result)?;
    validate_poll(config)?;
    validate_billing(config)?;
    validate_models(config)?;
    validate_workers(config)?;
    Ok(())
}

fn validate_provider(config: &Config) -> Result<(), ValidationError> {
    let url = &config.provider.queue_base_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ValidationError::InvalidBaseUrl { url: url.clone() });
    }

    for (field, value) in [
        ("provider.connect_timeout", &config.provider.connect_timeout),
        ("provider.request_timeout", &config.provider.request_timeout),
        ("cache.ttl", &config.cache.ttl),
        ("notify.timeout", &config.notify.timeout),
    ] {
        if value.is_zero() {
            return Err(ValidationError::ZeroDuration {
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_retry(name: &str, budget: &RetryBudget) -> Result<(), ValidationError> {
    if budget.max_attempts == 0 {
        return Err(ValidationError::NoRetryAttempts {
            name: name.to_string(),
        });
    }

    if budget.max_delay.0 < budget.base_delay.0 {
        return Err(ValidationError::RetryDelayInverted {
            name: name.to_string(),
            base: budget.base_delay.to_string(),
            max: budget.max_delay.to_string(),
        });
    }

    Ok(())
}

fn validate_poll(config: &Config) -> Result<(), ValidationError> {
    let poll = &config.poll;

    for (field, value) in [
        ("poll.initial_interval", &poll.initial_interval),
        ("poll.max_interval", &poll.max_interval),
        ("poll.timeout", &poll.timeout),
    ] {
        if value.is_zero() {
            return Err(ValidationError::ZeroDuration {
                field: field.to_string(),
            });
        }
    }

    if !(poll.backoff_multiplier >= 1.0) {
        return Err(ValidationError::InvalidBackoffMultiplier(
            poll.backoff_multiplier,
        ));
    }

    if poll.max_attempts == 0 {
        return Err(ValidationError::NoPollAttempts);
    }

    let mut timeouts = vec![("poll.timeout".to_string(), &poll.timeout)];
    for (kind, budget) in &poll.by_kind {
        kind.parse::<JobKind>()
            .map_err(|_| ValidationError::UnknownJobKind(kind.clone()))?;

        let field = format!("poll.by_kind.{kind}.timeout");
        if budget.timeout.is_zero() {
            return Err(ValidationError::ZeroDuration { field });
        }
        if budget.max_attempts == 0 {
            return Err(ValidationError::NoKindPollAttempts { kind: kind.clone() });
        }
        timeouts.push((field, &budget.timeout));
    }

    // Task metadata must outlive the longest poll that reads it
    let ttl = &config.cache.ttl;
    for (field, timeout) in timeouts {
        if timeout.0 >= ttl.0 {
            return Err(ValidationError::PollOutlivesCache {
                field,
                timeout: timeout.to_string(),
                ttl: ttl.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_billing(config: &Config) -> Result<(), ValidationError> {
    if config.billing.default_price < 0 {
        return Err(ValidationError::NegativePrice {
            operation: "default".to_string(),
            price: config.billing.default_price,
        });
    }

    for (operation, price) in &config.billing.prices {
        if *price < 0 {
            return Err(ValidationError::NegativePrice {
                operation: operation.clone(),
                price: *price,
            });
        }
    }

    Ok(())
}

/// Every job kind needs a default model; unknown kinds are typos
fn validate_models(config: &Config) -> Result<(), ValidationError> {
    for kind in config.models.defaults.keys() {
        kind.parse::<JobKind>()
            .map_err(|_| ValidationError::UnknownJobKind(kind.clone()))?;
    }

    for kind in JobKind::ALL {
        let configured = config
            .models
            .defaults
            .get(kind.as_str())
            .is_some_and(|model| !model.trim().is_empty());
        if !configured {
            return Err(ValidationError::MissingModel(kind));
        }
    }

    Ok(())
}

fn validate_workers(config: &Config) -> Result<(), ValidationError> {
    if config.workers.count == 0 {
        return Err(ValidationError::NoWorkers);
    }
    Ok(())
}
