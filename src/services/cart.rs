use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    ModelTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{
    cart, cart_item, Cart, CartItem, MenuItem,
};
use crate::errors::ServiceError;

/// Who a cart belongs to.
///
/// The storefront resolves the request identity into this sum type once,
/// so authenticated and anonymous sessions share a single lookup path and
/// cannot race each other into duplicate carts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    Customer(Uuid),
    Guest(String),
}

/// A cart and its lines.
#[derive(Debug, Clone, Serialize)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

/// Shopping cart service.
///
/// Lines snapshot the menu price at add time; a later menu price change
/// never alters an existing cart.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetch the owner's cart, creating an empty one if none exists.
    pub async fn get_or_create(&self, owner: &CartOwner) -> Result<cart::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.get_or_create_on(&txn, owner).await?;
        txn.commit().await?;
        Ok(cart)
    }

    /// Fetch the owner's cart with its lines (empty items if no cart yet).
    pub async fn get_with_items(&self, owner: &CartOwner) -> Result<CartWithItems, ServiceError> {
        let cart = self.get_or_create(owner).await?;
        let items = cart.find_related(CartItem).all(&*self.db).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Add a menu item to the cart, merging quantity into an existing line
    /// for the same item. The line keeps its original price snapshot.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        menu_item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = self.get_or_create_on(&txn, owner).await?;
        let menu_item = MenuItem::find_by_id(menu_item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Menu item {menu_item_id} not found"))
            })?;
        if !menu_item.is_available {
            return Err(ServiceError::ValidationError(format!(
                "{} is currently unavailable",
                menu_item.name
            )));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::MenuItemId.eq(menu_item_id))
            .one(&txn)
            .await?;

        match existing {
            Some(line) => {
                let merged = line.quantity + quantity;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(merged);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    menu_item_id: Set(menu_item_id),
                    quantity: Set(quantity),
                    unit_price: Set(menu_item.price),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;
            }
        }

        self.touch(&txn, cart.clone()).await?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, %menu_item_id, quantity, "cart line added");
        Ok(CartWithItems { cart, items })
    }

    /// Set a line's quantity; zero removes the line.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        owner: &CartOwner,
        menu_item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity must not be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let cart = self.find_cart_on(&txn, owner).await?.ok_or_else(|| {
            ServiceError::NotFound("no cart for this owner".to_string())
        })?;

        let line = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::MenuItemId.eq(menu_item_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Menu item {menu_item_id} is not in the cart"))
            })?;

        if quantity == 0 {
            line.delete(&txn).await?;
        } else {
            let mut active: cart_item::ActiveModel = line.into();
            active.quantity = Set(quantity);
            active.update(&txn).await?;
        }

        self.touch(&txn, cart.clone()).await?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        Ok(CartWithItems { cart, items })
    }

    /// Remove a line entirely.
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        menu_item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        self.update_quantity(owner, menu_item_id, 0).await
    }

    /// Drop every line, keeping the cart row.
    #[instrument(skip(self))]
    pub async fn clear(&self, owner: &CartOwner) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        if let Some(cart) = self.find_cart_on(&txn, owner).await? {
            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&txn)
                .await?;
            self.touch(&txn, cart).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Fold a guest session's cart into the customer's cart after login.
    ///
    /// Colliding lines merge quantities and keep the customer cart's
    /// (older) price snapshot; the guest cart is destroyed.
    #[instrument(skip(self))]
    pub async fn merge_guest_cart(
        &self,
        session_token: &str,
        customer_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let customer_cart = self
            .get_or_create_on(&txn, &CartOwner::Customer(customer_id))
            .await?;

        let guest_cart = self
            .find_cart_on(&txn, &CartOwner::Guest(session_token.to_string()))
            .await?;

        if let Some(guest_cart) = guest_cart {
            let guest_items = CartItem::find()
                .filter(cart_item::Column::CartId.eq(guest_cart.id))
                .all(&txn)
                .await?;

            for guest_line in guest_items {
                let existing = CartItem::find()
                    .filter(cart_item::Column::CartId.eq(customer_cart.id))
                    .filter(cart_item::Column::MenuItemId.eq(guest_line.menu_item_id))
                    .one(&txn)
                    .await?;

                match existing {
                    Some(line) => {
                        let merged = line.quantity + guest_line.quantity;
                        let mut active: cart_item::ActiveModel = line.into();
                        active.quantity = Set(merged);
                        active.update(&txn).await?;
                    }
                    None => {
                        cart_item::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            cart_id: Set(customer_cart.id),
                            menu_item_id: Set(guest_line.menu_item_id),
                            quantity: Set(guest_line.quantity),
                            unit_price: Set(guest_line.unit_price),
                            created_at: Set(Utc::now()),
                        }
                        .insert(&txn)
                        .await?;
                    }
                }
            }

            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(guest_cart.id))
                .exec(&txn)
                .await?;
            guest_cart.delete(&txn).await?;
            info!(%customer_id, "guest cart merged");
        }

        self.touch(&txn, customer_cart.clone()).await?;
        txn.commit().await?;
        Ok(customer_cart)
    }

    async fn find_cart_on(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(Cart::find().filter(owner_condition(owner)).one(conn).await?)
    }

    async fn get_or_create_on(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(cart) = self.find_cart_on(conn, owner).await? {
            return Ok(cart);
        }

        let (customer_id, session_token) = match owner {
            CartOwner::Customer(id) => (Some(*id), None),
            CartOwner::Guest(token) => (None, Some(token.clone())),
        };

        Ok(cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            session_token: Set(session_token),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?)
    }

    async fn touch(
        &self,
        conn: &impl ConnectionTrait,
        cart: cart::Model,
    ) -> Result<(), ServiceError> {
        let mut active: cart::ActiveModel = cart.into();
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
        Ok(())
    }
}

fn owner_condition(owner: &CartOwner) -> Condition {
    match owner {
        CartOwner::Customer(id) => Condition::all().add(cart::Column::CustomerId.eq(*id)),
        CartOwner::Guest(token) => {
            Condition::all().add(cart::Column::SessionToken.eq(token.as_str()))
        }
    }
}
