mod events_tests;
mod gateway_tests;
mod health_tests;
