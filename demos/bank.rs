//! Simple example demonstrating atomic transfers between accounts.

use std::sync::Arc;
use std::thread;

use mozaik::{atomic, atomic_read, TCell};

const ACCOUNTS: usize = 8;
const INITIAL_BALANCE: u64 = 500;
const TRANSFERS: usize = 10_000;

fn main() {
    let accounts: Arc<Vec<TCell<u64>>> =
        Arc::new((0..ACCOUNTS).map(|_| TCell::new(INITIAL_BALANCE)).collect());

    let mut handles = vec![];
    for worker in 0..4 {
        let accounts = accounts.clone();
        handles.push(thread::spawn(move || {
            mozaik::thread_init();

            for i in 0..TRANSFERS {
                let from = (worker + i) % ACCOUNTS;
                let to = (worker + i + 3) % ACCOUNTS;
                let amount = (mozaik::rand::next_u64() % 20) + 1;

                atomic(|| {
                    let balance = accounts[from].get()?;
                    if balance >= amount {
                        accounts[from].set(balance - amount)?;
                        let other = accounts[to].get()?;
                        accounts[to].set(other + amount)?;
                    }
                    Ok(())
                })
                .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    mozaik::thread_init();
    let balances: Vec<u64> = atomic_read(|| {
        accounts
            .iter()
            .map(|account| account.get())
            .collect::<Result<_, _>>()
    })
    .unwrap();

    let total: u64 = balances.iter().sum();
    println!("balances: {:?}", balances);
    println!("total:    {} (expected {})", total, ACCOUNTS as u64 * INITIAL_BALANCE);
    assert_eq!(total, ACCOUNTS as u64 * INITIAL_BALANCE);
}
