mod utils;

mod reload;
