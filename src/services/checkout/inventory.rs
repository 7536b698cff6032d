//! Stock validation for cart lines.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use uuid::Uuid;

use super::cart::CartLine;
use crate::entities::product;
use crate::errors::ServiceError;

/// Outcome of checking a cart against live stock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    /// Products with no stock left
    pub out_of_stock: Vec<String>,
    /// Products with some stock, but less than the requested quantity
    pub max_exceed: Vec<String>,
}

impl StockCheck {
    pub fn is_valid(&self) -> bool {
        self.out_of_stock.is_empty() && self.max_exceed.is_empty()
    }

    pub fn message(&self) -> String {
        let mut message = String::new();
        if !self.out_of_stock.is_empty() {
            message.push_str(&format!(
                "The following items are out of stock: {}. ",
                self.out_of_stock.join(", ")
            ));
        }
        if !self.max_exceed.is_empty() {
            message.push_str(&format!(
                "The following items exceed available stock: {}.",
                self.max_exceed.join(", ")
            ));
        }
        message.trim().to_string()
    }

    /// Converts a failed check into the matching error.
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ServiceError::StockUnavailable(self))
        }
    }
}

/// Classifies every line whose product still exists.
pub fn check_stock(lines: &[CartLine]) -> StockCheck {
    let mut check = StockCheck::default();
    for line in lines {
        let Some(product) = &line.product else {
            continue;
        };
        if product.stock <= 0 {
            check.out_of_stock.push(product.name.clone());
        } else if product.stock < line.quantity {
            check.max_exceed.push(product.name.clone());
        }
    }
    check
}

/// Takes `quantity` units of stock, but only if that many remain.
///
/// Returns `false` without writing when the row no longer has enough stock,
/// which happens when a concurrent settlement got there first.
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Puts `quantity` units back. Returns `false` if the product no longer exists.
pub async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).add(quantity),
        )
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}
