use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use marketsync_core::{
    CoreError, CoreResult, InsertOutcome, NewOrder, ShipmentStatus, TenantStore,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Tenant-scoped store. Every operation opens a transaction and binds it to
/// the tenant through `app.current_tenant` before touching business tables.
#[derive(Debug, Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin_for_tenant(&self, tenant_id: Uuid) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // Third argument scopes the setting to this transaction.
        sqlx::query("SELECT set_config('app.current_tenant', $1::text, true)")
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn insert_order(&self, order: &NewOrder) -> StoreResult<InsertOutcome> {
        let quantities = order
            .line_items
            .iter()
            .map(|item| item_quantity(item.quantity))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut tx = self.begin_for_tenant(order.tenant_id).await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE tenant_id = $1 AND source_provider = $2 AND external_id = $3
            "#,
        )
        .bind(order.tenant_id)
        .bind(&order.source_provider)
        .bind(&order.external_id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Ok(InsertOutcome::AlreadyExists);
        }

        let shipping_address = serde_json::to_value(&order.shipping_address)?;
        let billing_address = order
            .billing_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        // A concurrent insert between the check and here lands on the unique key.
        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                id, tenant_id, integration_id, source_provider, external_id,
                external_status, status, customer_name, customer_email, customer_phone,
                shipping_address, billing_address, total_amount, currency,
                payment_status, payment_method, ordered_at, delivery_method,
                pickup_point_id, fulfillment_channel, customer_note, provider_raw_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22)
            ON CONFLICT (tenant_id, source_provider, external_id) DO NOTHING
            "#,
        )
        .bind(order.id)
        .bind(order.tenant_id)
        .bind(order.integration_id)
        .bind(&order.source_provider)
        .bind(&order.external_id)
        .bind(&order.external_status)
        .bind(order.status.as_str())
        .bind(&order.customer.name)
        .bind(&order.customer.email)
        .bind(&order.customer.phone)
        .bind(shipping_address)
        .bind(billing_address)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(order.payment_status.as_str())
        .bind(&order.payment_method)
        .bind(order.ordered_at)
        .bind(&order.extras.delivery_method)
        .bind(&order.extras.pickup_point_id)
        .bind(&order.extras.fulfillment_channel)
        .bind(&order.extras.customer_note)
        .bind(&order.raw_data)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(InsertOutcome::AlreadyExists);
        }

        for (item, quantity) in order.line_items.iter().zip(quantities) {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, tenant_id, order_id, external_id, sku, name, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order.tenant_id)
            .bind(order.id)
            .bind(&item.external_id)
            .bind(&item.sku)
            .bind(&item.name)
            .bind(quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            tenant_id = %order.tenant_id,
            provider = %order.source_provider,
            external_id = %order.external_id,
            "order inserted"
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn set_shipment_status(
        &self,
        tenant_id: Uuid,
        shipment_id: Uuid,
        status: ShipmentStatus,
    ) -> StoreResult<()> {
        let mut tx = self.begin_for_tenant(tenant_id).await?;
        let result = sqlx::query(
            r#"
            UPDATE shipments SET status = $1, updated_at = now()
            WHERE id = $2 AND tenant_id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(shipment_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("shipment {}", shipment_id)));
        }
        tx.commit().await?;
        Ok(())
    }
}

/// `order_items.quantity` is a Postgres INTEGER
fn item_quantity(quantity: u32) -> StoreResult<i32> {
    i32::try_from(quantity).map_err(|_| {
        StoreError::Core(CoreError::Invalid(format!(
            "line item quantity {} does not fit order_items.quantity",
            quantity
        )))
    })
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn insert_order_if_absent(&self, order: &NewOrder) -> CoreResult<InsertOutcome> {
        Ok(self.insert_order(order).await?)
    }

    async fn update_shipment_status(
        &self,
        tenant_id: Uuid,
        shipment_id: Uuid,
        status: ShipmentStatus,
    ) -> CoreResult<()> {
        Ok(self.set_shipment_status(tenant_id, shipment_id, status).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_quantity_rejects_overflow() {
        assert_eq!(item_quantity(3).unwrap(), 3);
        assert_eq!(item_quantity(i32::MAX as u32).unwrap(), i32::MAX);

        let err = item_quantity(i32::MAX as u32 + 1).unwrap_err();
        assert!(matches!(err, StoreError::Core(CoreError::Invalid(_))));
        assert!(matches!(CoreError::from(err), CoreError::Invalid(_)));
    }
}
