//! Decimal digits of pi at arbitrary positions, without computing the ones before.
//!
//! Plouffe's method as refined by Bellard (1997): for every prime `a` up to `2N`
//! the series is evaluated modulo a power of `a`, and the fractional parts are
//! summed. Products are taken in `u128` so no precision is lost in the modular
//! arithmetic; only the final accumulation is floating point.

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn inv_mod(x: u64, y: u64) -> u64 {
    let (mut u, mut v) = (x as i64, y as i64);
    let (mut a, mut c) = (0i64, 1i64);
    while u != 0 {
        let q = v / u;
        (c, a) = (a - q * c, c);
        (u, v) = (v - q * u, u);
    }
    a.rem_euclid(y as i64) as u64
}

fn pow_mod(a: u64, mut b: u64, m: u64) -> u64 {
    let mut r = 1 % m;
    let mut aa = a % m;
    while b > 0 {
        if b & 1 == 1 {
            r = mul_mod(r, aa, m);
        }
        b >>= 1;
        aa = mul_mod(aa, aa, m);
    }
    r
}

fn is_prime(n: u64) -> bool {
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

fn next_prime(mut n: u64) -> u64 {
    loop {
        n += 1;
        if is_prime(n) {
            return n;
        }
    }
}

/// The `n`-th digit of pi after the decimal point, 1-based (`nth_digit(1) == 1`).
pub fn nth_digit(n: u32) -> u8 {
    let n = n.max(1) as u64;
    let big_n = ((n + 20) as f64 * std::f64::consts::LN_10 / std::f64::consts::LN_2) as u64;
    let mut sum = 0.0f64;

    let mut a = 3u64;
    while a <= 2 * big_n {
        let vmax = ((2 * big_n) as f64).ln() / (a as f64).ln();
        let vmax = vmax as u32;
        let av = a.pow(vmax);

        let mut s = 0u64;
        let mut num = 1u64;
        let mut den = 1u64;
        let mut v: i64 = 0;
        let mut kq = 1u64;
        let mut kq2 = 1u64;

        for k in 1..=big_n {
            let mut t = k;
            if kq >= a {
                loop {
                    t /= a;
                    v -= 1;
                    if t % a != 0 {
                        break;
                    }
                }
                kq = 0;
            }
            kq += 1;
            num = mul_mod(num, t, av);

            let mut t = 2 * k - 1;
            if kq2 >= a {
                if kq2 == a {
                    loop {
                        t /= a;
                        v += 1;
                        if t % a != 0 {
                            break;
                        }
                    }
                }
                kq2 -= a;
            }
            den = mul_mod(den, t, av);
            kq2 += 2;

            if v > 0 {
                let mut t = inv_mod(den, av);
                t = mul_mod(t, num, av);
                t = mul_mod(t, k, av);
                for _ in v..vmax as i64 {
                    t = mul_mod(t, a, av);
                }
                s += t;
                if s >= av {
                    s -= av;
                }
            }
        }

        let t = pow_mod(10, n - 1, av);
        s = mul_mod(s, t, av);
        sum = (sum + s as f64 / av as f64) % 1.0;
        a = next_prime(a);
    }

    let mut head = (sum * 1e9) as u64;
    // A leading zero digit leaves fewer than nine significant digits.
    if head < 100_000_000 {
        return 0;
    }
    while head >= 10 {
        head /= 10;
    }
    head as u8
}

/// Digits at positions `start ..= start + count - 1`.
pub fn series(start: u32, count: u32) -> Vec<u8> {
    (start..start.saturating_add(count)).map(nth_digit).collect()
}
