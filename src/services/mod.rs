pub mod assembler;
pub mod cart;
pub mod checkout;
pub mod notifications;
pub mod orders;
pub mod product_lookup;

pub use assembler::{AssembledCart, AssembledCartItem, CartAssembler};
pub use cart::CartService;
pub use checkout::{CheckoutRedirect, CheckoutService};
pub use notifications::{LogNotifier, OrderNotifier};
pub use orders::OrderService;
pub use product_lookup::{ProductLookupService, ResolvedProduct};
