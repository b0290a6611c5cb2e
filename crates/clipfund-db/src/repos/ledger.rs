//! Users, provider accounts, ledger and the settlement transaction

use rust_decimal::Decimal;
use sqlx::PgPool;

use clipfund_types::{Campaign, CampaignId, LedgerTransaction, UserId};

use crate::models::{DbCampaign, DbTransaction};
use crate::repos::campaign::{insert_transition, CAMPAIGN_COLUMNS};
use crate::repos::submission::update_earnings;
use crate::store::SettlementPlan;
use crate::{DbError, DbResult};

pub struct LedgerRepo {
    pool: PgPool,
}

impl LedgerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn link_account(&self, account_id: &str, user_id: UserId) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO provider_accounts (account_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (account_id) DO UPDATE SET user_id = EXCLUDED.user_id
            "#,
        )
        .bind(account_id)
        .bind(user_id.as_uuid())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn flag_reconnect(&self, account_id: &str) -> DbResult<Option<UserId>> {
        let user: Option<uuid::Uuid> = sqlx::query_scalar(
            r#"
            UPDATE users u
            SET needs_reconnect = TRUE, updated_at = NOW()
            FROM provider_accounts a
            WHERE a.account_id = $1 AND u.id = a.user_id
            RETURNING u.id
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user.map(UserId::from_uuid))
    }

    pub async fn needs_reconnect(&self, user_id: UserId) -> DbResult<bool> {
        let flagged: Option<bool> =
            sqlx::query_scalar("SELECT needs_reconnect FROM users WHERE id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(flagged.unwrap_or(false))
    }

    pub async fn balance(&self, user_id: UserId) -> DbResult<Decimal> {
        let balance: Option<Decimal> = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance.unwrap_or(Decimal::ZERO))
    }

    pub async fn list_by_campaign(&self, campaign_id: CampaignId) -> DbResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, DbTransaction>(
            r#"
            SELECT id, user_id, tx_type, amount, status, campaign_id, submission_id,
                   description, created_at
            FROM transactions
            WHERE campaign_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LedgerTransaction::try_from).collect()
    }

    /// Ledger rows, balance credits, final shares and the campaign's terminal
    /// update commit together or not at all
    pub async fn settle(&self, plan: &SettlementPlan) -> DbResult<Campaign> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM campaigns WHERE id = $1 FOR UPDATE", CAMPAIGN_COLUMNS);
        let current = sqlx::query_as::<_, DbCampaign>(&sql)
            .bind(plan.campaign_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("campaign {}", plan.campaign_id)))?;
        let current = Campaign::try_from(current)?;

        if current.is_settled() {
            return Err(DbError::AlreadySettled(plan.campaign_id.to_string()));
        }
        if current.status != clipfund_types::CampaignStatus::Active {
            return Err(DbError::InvalidInput(format!(
                "campaign {} is {}",
                plan.campaign_id, current.status
            )));
        }

        for entry in &plan.transactions {
            sqlx::query(
                r#"
                INSERT INTO transactions
                    (id, user_id, tx_type, amount, status, campaign_id, submission_id,
                     description, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.user_id.as_uuid())
            .bind(entry.tx_type.as_str())
            .bind(entry.amount)
            .bind(entry.status.as_str())
            .bind(entry.campaign_id.map(|id| *id.as_uuid()))
            .bind(entry.submission_id.map(|id| *id.as_uuid()))
            .bind(&entry.description)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO users (id, balance)
                VALUES ($1, $2)
                ON CONFLICT (id)
                DO UPDATE SET balance = users.balance + $2, updated_at = NOW()
                "#,
            )
            .bind(entry.user_id.as_uuid())
            .bind(entry.amount)
            .execute(&mut *tx)
            .await?;
        }

        update_earnings(&mut *tx, &plan.final_shares).await?;
        insert_transition(&mut *tx, &plan.transition).await?;

        let sql = format!(
            r#"
            UPDATE campaigns
            SET status = 'COMPLETED',
                payout_status = 'COMPLETED',
                payout_error = NULL,
                completed_at = $2,
                locked_at = COALESCE(locked_at, $2),
                remaining_budget = GREATEST(remaining_budget - $3, 0),
                metrics_processing_at = NULL,
                metrics_lease_token = NULL,
                next_metrics_fetch_at = NULL,
                updated_at = $2
            WHERE id = $1
            RETURNING {}
            "#,
            CAMPAIGN_COLUMNS
        );
        let settled = sqlx::query_as::<_, DbCampaign>(&sql)
            .bind(plan.campaign_id.as_uuid())
            .bind(plan.settled_at)
            .bind(plan.pool)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Campaign::try_from(settled)
    }
}
