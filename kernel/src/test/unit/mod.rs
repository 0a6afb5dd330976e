mod assignment;
mod builder;
mod strided;
