use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::entities::{cart, cart_item, product};
use crate::errors::ServiceError;

/// A cart line joined with the live product it references.
///
/// `product` is `None` when the product has since been removed from the
/// catalog; such lines are ignored by stock checks and pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub cart_item_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub product: Option<product::Model>,
}

impl CartLine {
    pub fn line_total(&self) -> i64 {
        self.product
            .as_ref()
            .map(|p| p.offer_price * i64::from(self.quantity))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedCart {
    pub cart: Option<cart::Model>,
    pub lines: Vec<CartLine>,
}

impl LoadedCart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.lines.len()
    }
}

/// Loads the user's cart with fresh product rows.
pub async fn load_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<LoadedCart, ServiceError> {
    let Some(cart) = cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    else {
        return Ok(LoadedCart::default());
    };

    let rows = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .find_also_related(product::Entity)
        .all(conn)
        .await?;

    let lines = rows
        .into_iter()
        .map(|(item, product)| CartLine {
            cart_item_id: item.id,
            product_id: item.product_id,
            quantity: item.quantity,
            product,
        })
        .collect();

    Ok(LoadedCart {
        cart: Some(cart),
        lines,
    })
}

/// Removes every line from the cart.
pub async fn empty_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<u64, ServiceError> {
    let result = cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
