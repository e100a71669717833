pub mod discounts;
pub mod mercadopago;
pub mod orders;
pub mod products;
